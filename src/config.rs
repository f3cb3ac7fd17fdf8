//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Service configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to bind the HTTP listener to.
    pub bind: String,
    /// Port to listen on.
    pub port: u16,
    /// Largest accepted upload, in bytes (inclusive).
    pub max_upload_bytes: u64,
    /// How long a finished conversion stays downloadable.
    pub download_ttl: Duration,
    /// How often the expiry sweeper runs.
    pub sweep_interval: Duration,
    /// Root under which every task gets its own directory.
    pub temp_root: PathBuf,
    /// Explicit converter path; skips the `PATH` search when set.
    pub converter_override: Option<PathBuf>,
    /// Kill the converter after this long. `None` lets it run to completion.
    pub conversion_timeout: Option<Duration>,
    /// Comma-separated CORS origins. `None` allows any origin.
    pub cors_allowed_origins: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 100 * MIB,
            download_ttl: Duration::from_secs(30 * 60), // 30 minutes
            sweep_interval: Duration::from_secs(60),
            temp_root: std::env::temp_dir().join("epub2pdf"),
            converter_override: None,
            conversion_timeout: None,
            cors_allowed_origins: None,
        }
    }
}

impl ServiceConfig {
    /// Build from `EPUB_CONVERT_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_upload_mb: u64 = env_parse("EPUB_CONVERT_MAX_UPLOAD_MB").unwrap_or(100);

        Self {
            bind: std::env::var("EPUB_CONVERT_BIND").unwrap_or(defaults.bind),
            port: env_parse("EPUB_CONVERT_PORT").unwrap_or(defaults.port),
            max_upload_bytes: max_upload_mb.saturating_mul(MIB),
            download_ttl: env_parse("EPUB_CONVERT_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_ttl),
            sweep_interval: env_parse::<u64>("EPUB_CONVERT_SWEEP_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            temp_root: std::env::var("EPUB_CONVERT_TMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_root),
            converter_override: std::env::var("EPUB_CONVERT_CONVERTER")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            conversion_timeout: env_parse::<u64>("EPUB_CONVERT_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            cors_allowed_origins: std::env::var("EPUB_CONVERT_CORS_ORIGINS")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }

    /// Upload limit in whole MiB, for error messages.
    pub fn max_upload_mb(&self) -> u64 {
        self.max_upload_bytes / MIB
    }
}

/// Parse an environment variable, warning and returning `None` on garbage.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(config.max_upload_mb(), 100);
        assert_eq!(config.download_ttl, Duration::from_secs(1800));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert!(config.temp_root.ends_with("epub2pdf"));
        assert!(config.conversion_timeout.is_none());
    }

    #[test]
    fn env_parse_rejects_garbage() {
        // SAFETY: This test runs in isolation; no other thread reads this variable.
        unsafe { std::env::set_var("EPUB_CONVERT_TEST_GARBAGE", "twelve") };
        assert_eq!(env_parse::<u64>("EPUB_CONVERT_TEST_GARBAGE"), None);

        unsafe { std::env::set_var("EPUB_CONVERT_TEST_GARBAGE", " 12 ") };
        assert_eq!(env_parse::<u64>("EPUB_CONVERT_TEST_GARBAGE"), Some(12));

        unsafe { std::env::remove_var("EPUB_CONVERT_TEST_GARBAGE") };
        assert_eq!(env_parse::<u64>("EPUB_CONVERT_TEST_GARBAGE"), None);
    }
}
