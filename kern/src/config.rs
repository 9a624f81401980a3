//! Configuration supplied to `Runtime::start`.
//!
//! This runtime is mounted at run time rather than built from a baked-in
//! image, so its descriptor is a plain value the host constructs (or loads
//! from TOML) and hands to `start`.

use serde::{Deserialize, Serialize};

/// Parameters that describe how a `Runtime` should come up.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Path to the FAT16 image to mount at root.
    pub image_path: String,
    /// Number of milliseconds represented by one tick.
    pub tick_ms: u32,
    /// Number of 512-byte shared-memory sections to carve the pool into.
    pub shared_memory_sections: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            image_path: String::new(),
            tick_ms: 10,
            shared_memory_sections: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_tick_interval() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.tick_ms, 10);
        assert!(cfg.shared_memory_sections > 0);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let cfg = RuntimeConfig {
            image_path: "disk.img".into(),
            tick_ms: 5,
            shared_memory_sections: 32,
        };
        let text = toml::to_string(&cfg).expect("serialize");
        let back: RuntimeConfig = toml::from_str(&text).expect("deserialize");
        assert_eq!(back.image_path, cfg.image_path);
        assert_eq!(back.tick_ms, cfg.tick_ms);
        assert_eq!(back.shared_memory_sections, cfg.shared_memory_sections);
    }
}
