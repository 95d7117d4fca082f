use anyhow::Context;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};

const KST_OFFSET_SECS: i32 = 9 * 3600;

pub fn kst() -> anyhow::Result<FixedOffset> {
    FixedOffset::east_opt(KST_OFFSET_SECS).context("invalid KST offset")
}

/// Calendar date in Korea at `now_utc`.
pub fn kst_today(now_utc: DateTime<Utc>) -> anyhow::Result<NaiveDate> {
    Ok(now_utc.with_timezone(&kst()?).date_naive())
}

/// First calendar date of a trailing window of `lookback_days` ending at `now_utc` (KST).
pub fn lookback_start(now_utc: DateTime<Utc>, lookback_days: i64) -> anyhow::Result<NaiveDate> {
    anyhow::ensure!(
        lookback_days >= 1,
        "lookback window must be at least one day (got {lookback_days})"
    );
    Ok(kst_today(now_utc)? - Duration::days(lookback_days))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn kst_date_rolls_over_before_utc() {
        // 2026-01-05 16:00 UTC = 2026-01-06 01:00 KST
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 16, 0, 0).unwrap();
        assert_eq!(
            kst_today(now).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 6).unwrap()
        );
    }

    #[test]
    fn lookback_counts_calendar_days() {
        // 2026-10-16 03:00 UTC = 12:00 KST
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 3, 0, 0).unwrap();
        assert_eq!(
            lookback_start(now, 60).unwrap(),
            NaiveDate::from_ymd_opt(2026, 8, 17).unwrap()
        );
        assert_eq!(
            lookback_start(now, 30).unwrap(),
            NaiveDate::from_ymd_opt(2026, 9, 16).unwrap()
        );
    }

    #[test]
    fn rejects_empty_window() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 3, 0, 0).unwrap();
        assert!(lookback_start(now, 0).is_err());
    }
}
