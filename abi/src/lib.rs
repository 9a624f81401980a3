//! VM ABI definitions, shared between the runtime and guest code.
//!
//! A dependency-free leaf that both sides of the call boundary can agree on.
//! Nothing here is guest-specific or runtime-specific; if a type only makes
//! sense on one side of the boundary, it belongs in `kern` or `userlib`
//! instead.

#![cfg_attr(not(test), no_std)]

use serde::{Deserialize, Serialize};

/// Descriptor numbers 0, 1, and 2 are reserved for the console and are
/// forwarded straight to the machine layer without consulting the FAT state.
pub const STDIN_FILENO: i32 = 0;
pub const STDOUT_FILENO: i32 = 1;
pub const STDERR_FILENO: i32 = 2;

/// First descriptor number available for FAT-backed files.
pub const FIRST_FAT_FILENO: i32 = 3;

/// FAT16 sectors are always this many bytes; `BPB::bytes_per_sector` is
/// validated against it at mount.
pub const SECTOR_SIZE: usize = 512;

/// Size of one shared-memory section, and the unit the pool is carved into.
pub const SHARED_MEMORY_SECTION_SIZE: usize = 512;

/// Status code returned by every VM call.
///
/// The complete error taxonomy: four failure kinds plus success. Deliberately
/// not `thiserror`-derived: the set is small, closed, and round-trips
/// directly to a guest-visible status code.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum VMStatus {
    Success,
    Failure,
    ErrorInvalidParameter,
    ErrorInvalidId,
    ErrorInvalidState,
}

impl VMStatus {
    pub fn is_success(self) -> bool {
        matches!(self, VMStatus::Success)
    }
}

/// Thread priority. Numerically larger is more important. There are exactly
/// four fixed bands, so an ordered enum reads more honestly than a raw
/// integer here.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Idle = 0,
    Low = 1,
    Normal = 2,
    High = 3,
}

impl Priority {
    pub const ALL: [Priority; 4] =
        [Priority::High, Priority::Normal, Priority::Low, Priority::Idle];

    /// Checks if `self` is strictly more important than `other`. Kept as a
    /// named predicate, not a bare `>`, so it reads correctly regardless of
    /// which direction "more important" happens to sort.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self > other
    }
}

/// Dense, never-reused identifier for a thread.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ThreadId(pub u32);

/// Dense, never-reused identifier for a mutex.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct MutexId(pub u32);

/// Coarse run-state a guest can observe about one of its own threads via
/// `VMThreadState`. Collapses the runtime's internal `WAITING` sub-states
/// (sleep, mutex, memory, I/O) into one value.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum VMThreadState {
    Dead,
    Ready,
    Running,
    Waiting,
}

/// Snapshot returned by `VMMutexQuery`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VMMutexStatus {
    pub locked: bool,
    pub owner: Option<ThreadId>,
}

/// Timeout accepted by `VMMutexAcquire`, in ticks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Timeout {
    Immediate,
    Infinite,
    Ticks(u32),
}

bitflags::bitflags! {
    /// Open-mode flags accepted by `VMFileOpen`, modeled on POSIX `open(2)`
    /// flags (`O_CREAT`, `O_APPEND`, the access-mode pair in the low two
    /// bits).
    #[derive(Serialize, Deserialize)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0b0000_0000;
        const WRONLY = 0b0000_0001;
        const RDWR   = 0b0000_0010;
        const CREAT  = 0b0000_0100;
        const APPEND = 0b0000_1000;
    }
}

impl OpenFlags {
    pub fn is_write_allowed(self) -> bool {
        self.intersects(OpenFlags::WRONLY | OpenFlags::RDWR)
    }

    pub fn is_read_allowed(self) -> bool {
        !self.contains(OpenFlags::WRONLY)
    }
}

/// Whence argument to `VMFileSeek`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SeekWhence {
    Set,
    Current,
    End,
}

bitflags::bitflags! {
    /// On-disk directory entry attribute byte.
    #[derive(Serialize, Deserialize)]
    pub struct FatAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
    }
}

impl FatAttributes {
    /// Attribute byte used by long-filename entries, which this runtime
    /// skips entirely.
    pub fn long_name_mask() -> FatAttributes {
        FatAttributes::READ_ONLY
            | FatAttributes::HIDDEN
            | FatAttributes::SYSTEM
            | FatAttributes::VOLUME_ID
    }

    pub fn is_long_name(self) -> bool {
        self == Self::long_name_mask()
    }
}

/// Decoded FAT date/time snapshot, as returned by `VMDateTime` and stored in
/// directory entries. Seconds are always even: FAT's on-disk time field only
/// has 2-second resolution.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct DateTime {
    pub day: u8,
    pub month: u8,
    /// Full calendar year (FAT stores an offset from 1980; this is already
    /// un-biased).
    pub year: u16,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Hundredths of a second, used only by `CrtTimeTenth`; zero elsewhere.
    pub hundredths: u8,
}

/// Packs a `DateTime`'s date half into the FAT on-disk format:
/// `YYYYYYYMMMMDDDDD` (year offset from 1980, 4-bit month, 5-bit day).
pub fn encode_fat_date(dt: &DateTime) -> u16 {
    let year_offset = dt.year.saturating_sub(1980) & 0x7F;
    (year_offset << 9) | ((dt.month as u16 & 0x0F) << 5) | (dt.day as u16 & 0x1F)
}

/// Packs a `DateTime`'s time half into the FAT on-disk format:
/// `HHHHHMMMMMMSSSSS`, seconds halved to fit 5 bits.
pub fn encode_fat_time(dt: &DateTime) -> u16 {
    let half_seconds = (dt.second / 2) as u16;
    ((dt.hour as u16 & 0x1F) << 11) | ((dt.minute as u16 & 0x3F) << 5) | (half_seconds & 0x1F)
}

/// Inverse of [`encode_fat_date`]/[`encode_fat_time`]. `time` may be omitted
/// for fields that only carry a date (`LstAccDate`).
pub fn decode_fat_datetime(date: u16, time: Option<u16>) -> DateTime {
    let year = 1980 + ((date >> 9) & 0x7F);
    let month = ((date >> 5) & 0x0F) as u8;
    let day = (date & 0x1F) as u8;
    let (hour, minute, second) = match time {
        Some(t) => (
            ((t >> 11) & 0x1F) as u8,
            ((t >> 5) & 0x3F) as u8,
            (((t & 0x1F) as u8) * 2),
        ),
        None => (0, 0, 0),
    };
    DateTime {
        day,
        month,
        year,
        hour,
        minute,
        second,
        hundredths: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_matches_spec_bands() {
        assert!(Priority::High.is_more_important_than(Priority::Normal));
        assert!(Priority::Normal.is_more_important_than(Priority::Low));
        assert!(Priority::Low.is_more_important_than(Priority::Idle));
        assert!(!Priority::Idle.is_more_important_than(Priority::Low));
    }

    #[test]
    fn date_time_round_trips_through_fat_encoding() {
        let dt = DateTime {
            day: 14,
            month: 3,
            year: 2024,
            hour: 9,
            minute: 41,
            second: 30,
            hundredths: 0,
        };
        let date = encode_fat_date(&dt);
        let time = encode_fat_time(&dt);
        let back = decode_fat_datetime(date, Some(time));
        // Seconds are rounded down to even because of FAT's 2-second
        // resolution.
        assert_eq!(back, DateTime { second: 30, ..dt });
    }

    #[test]
    fn odd_seconds_round_down_to_even() {
        let dt = DateTime {
            day: 1,
            month: 1,
            year: 1980,
            hour: 0,
            minute: 0,
            second: 31,
            hundredths: 0,
        };
        let time = encode_fat_time(&dt);
        let back = decode_fat_datetime(0, Some(time));
        assert_eq!(back.second, 30);
    }

    #[test]
    fn long_name_mask_matches_spec_constant() {
        let mask = FatAttributes::READ_ONLY
            | FatAttributes::HIDDEN
            | FatAttributes::SYSTEM
            | FatAttributes::VOLUME_ID;
        assert_eq!(mask, FatAttributes::long_name_mask());
        assert!(mask.is_long_name());
        assert!(!FatAttributes::DIRECTORY.is_long_name());
    }

    #[test]
    fn open_flags_access_mode_checks() {
        assert!(!OpenFlags::RDONLY.is_write_allowed());
        assert!(OpenFlags::WRONLY.is_write_allowed());
        assert!(OpenFlags::RDWR.is_write_allowed());
        assert!(OpenFlags::RDONLY.is_read_allowed());
        assert!(!OpenFlags::WRONLY.is_read_allowed());
    }
}
