use abi::{decode_fat_datetime, encode_fat_date, encode_fat_time, DateTime};
use proptest::prelude::*;

proptest::proptest! {
    /// Any `DateTime` within FAT's representable range round-trips through
    /// `encode_fat_date`/`encode_fat_time`/`decode_fat_datetime` exactly,
    /// seconds aside (FAT time only has 2-second resolution, so callers
    /// pass even seconds in the first place).
    #[test]
    fn date_time_round_trips(
        day in 1u8..=31,
        month in 1u8..=12,
        year in 1980u16..=2107,
        hour in 0u8..=23,
        minute in 0u8..=59,
        half_seconds in 0u8..=29,
    ) {
        let dt = DateTime {
            day,
            month,
            year,
            hour,
            minute,
            second: half_seconds * 2,
            hundredths: 0,
        };
        let date = encode_fat_date(&dt);
        let time = encode_fat_time(&dt);
        let back = decode_fat_datetime(date, Some(time));
        prop_assert_eq!(back, dt);
    }

    /// A date-only field (`LstAccDate`, which carries no time component)
    /// must still decode the date half correctly regardless of what the
    /// time half would have been.
    #[test]
    fn date_only_decode_ignores_time(
        day in 1u8..=31,
        month in 1u8..=12,
        year in 1980u16..=2107,
    ) {
        let dt = DateTime { day, month, year, hour: 0, minute: 0, second: 0, hundredths: 0 };
        let date = encode_fat_date(&dt);
        let back = decode_fat_datetime(date, None);
        prop_assert_eq!(back.day, dt.day);
        prop_assert_eq!(back.month, dt.month);
        prop_assert_eq!(back.year, dt.year);
        prop_assert_eq!((back.hour, back.minute, back.second), (0, 0, 0));
    }
}
