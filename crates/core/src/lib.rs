pub mod domain;
pub mod market;
pub mod predict;
pub mod time;

pub mod config {
    use anyhow::Context;
    use std::str::FromStr;

    pub const DEFAULT_LOOKBACK_DAYS: i64 = 60;
    pub const DEFAULT_KIS_TIMEOUT_SECS: u64 = 30;
    pub const MAX_KIS_ATTEMPTS: u32 = 5;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub sentry_dsn: Option<String>,
        pub kis_appkey: Option<String>,
        pub kis_appsecret: Option<String>,
        pub kis_base_url: Option<String>,
        pub kis_markets: Option<String>,
        pub kis_timeout_secs: u64,
        pub kis_max_attempts: u32,
        pub lookback_days: i64,
        pub listing_cache_ttl_secs: u64,
        pub public_dir: String,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let lookback_days = env_number("STOCKCAST_LOOKBACK_DAYS", DEFAULT_LOOKBACK_DAYS)?;
            anyhow::ensure!(
                lookback_days >= 1,
                "STOCKCAST_LOOKBACK_DAYS must be >= 1 (got {lookback_days})"
            );

            // A failed upstream call fails the request unless retries are opted into.
            let kis_max_attempts =
                env_number::<u32>("KIS_MAX_ATTEMPTS", 1)?.clamp(1, MAX_KIS_ATTEMPTS);

            Ok(Self {
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                kis_appkey: std::env::var("KIS_APPKEY").ok(),
                kis_appsecret: std::env::var("KIS_APPSECRET").ok(),
                kis_base_url: std::env::var("KIS_BASE_URL").ok(),
                kis_markets: std::env::var("KIS_MARKETS").ok(),
                kis_timeout_secs: env_number("KIS_TIMEOUT_SECS", DEFAULT_KIS_TIMEOUT_SECS)?,
                kis_max_attempts,
                lookback_days,
                listing_cache_ttl_secs: env_number("LISTING_CACHE_TTL_SECS", 0)?,
                public_dir: std::env::var("PUBLIC_DIR")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "public".to_string()),
            })
        }

        pub fn require_kis_appkey(&self) -> anyhow::Result<&str> {
            self.kis_appkey
                .as_deref()
                .context("KIS_APPKEY is required")
        }

        pub fn require_kis_appsecret(&self) -> anyhow::Result<&str> {
            self.kis_appsecret
                .as_deref()
                .context("KIS_APPSECRET is required")
        }
    }

    fn env_number<T>(key: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        parse_number(key, std::env::var(key).ok(), default)
    }

    fn parse_number<T>(key: &str, raw: Option<String>, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match raw {
            Some(s) => s
                .trim()
                .parse::<T>()
                .with_context(|| format!("{key} is not an integer: {s}")),
            None => Ok(default),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn unset_numbers_fall_back_to_default() {
            assert_eq!(parse_number::<u64>("LISTING_CACHE_TTL_SECS", None, 0).unwrap(), 0);
            assert_eq!(
                parse_number::<u64>("LISTING_CACHE_TTL_SECS", Some(" 300 ".to_string()), 0)
                    .unwrap(),
                300
            );
        }

        #[test]
        fn malformed_numbers_are_errors_naming_the_variable() {
            let err = parse_number::<u64>("LISTING_CACHE_TTL_SECS", Some("5m".to_string()), 0)
                .unwrap_err();
            assert!(err.to_string().contains("LISTING_CACHE_TTL_SECS"));

            let err = parse_number::<u32>("KIS_MAX_ATTEMPTS", Some("-1".to_string()), 1)
                .unwrap_err();
            assert!(err.to_string().contains("KIS_MAX_ATTEMPTS"));
        }
    }
}
