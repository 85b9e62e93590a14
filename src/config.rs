//! Runtime configuration loaded from environment variables

use std::path::PathBuf;
use std::time::Duration;

/// Which [`SessionStore`](crate::session::SessionStore) backs the cookie sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackend {
    Memory,
    File,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root of the flat-file store (`admin/`, `users/`, `uploads/`, `sessions/`)
    pub data_dir: PathBuf,
    pub port: u16,
    /// How long a (user, IP) confirmation stays valid
    pub confirm_window: chrono::Duration,
    /// Minimum significant characters for profile text fields
    pub min_field_chars: usize,
    /// First user id probed when allocating a new user
    pub user_id_start: u64,
    pub session_backend: SessionBackend,
    /// Take the client address from X-Forwarded-For / X-Real-IP
    pub trust_proxy: bool,
    pub max_upload_bytes: usize,
    /// Rate limit for POST /login per client address (None = disabled)
    pub login_rate_limit: Option<(u32, Duration)>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            port: 8080,
            confirm_window: chrono::Duration::days(30),
            min_field_chars: 5,
            user_id_start: 1,
            session_backend: SessionBackend::File,
            trust_proxy: false,
            max_upload_bytes: 10 * 1024 * 1024,
            login_rate_limit: Some((20, Duration::from_secs(60))),
        }
    }
}

impl AppConfig {
    /// Load config from `PROBLEMDESK_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let data_dir = std::env::var("PROBLEMDESK_DATA_DIR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let session_backend = match std::env::var("PROBLEMDESK_SESSION_BACKEND")
            .map(|v| v.trim().to_lowercase())
            .as_deref()
        {
            Ok("memory") => SessionBackend::Memory,
            Ok("file") | Err(_) => SessionBackend::File,
            Ok(other) => {
                tracing::warn!(value = other, "Unknown session backend, using file");
                SessionBackend::File
            }
        };

        let window_days: i64 = parse_var("PROBLEMDESK_CONFIRM_WINDOW_DAYS", 30);

        let login_rate_limit = if env_flag("PROBLEMDESK_LOGIN_RATE_LIMIT", true) {
            let max_requests = parse_var("PROBLEMDESK_LOGIN_RATE_MAX", 20);
            let window_secs = parse_var("PROBLEMDESK_LOGIN_RATE_WINDOW", 60);
            Some((max_requests, Duration::from_secs(window_secs)))
        } else {
            None
        };

        let config = Self {
            data_dir,
            port: parse_var("PROBLEMDESK_PORT", defaults.port),
            confirm_window: chrono::Duration::days(window_days),
            min_field_chars: parse_var("PROBLEMDESK_MIN_FIELD_CHARS", defaults.min_field_chars),
            user_id_start: parse_var("PROBLEMDESK_USER_ID_START", defaults.user_id_start).max(1),
            session_backend,
            trust_proxy: env_flag("PROBLEMDESK_TRUST_PROXY", false),
            max_upload_bytes: parse_var("PROBLEMDESK_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            login_rate_limit,
        };

        tracing::info!(
            data_dir = %config.data_dir.display(),
            port = config.port,
            window_days,
            min_field_chars = config.min_field_chars,
            session_backend = ?config.session_backend,
            trust_proxy = config.trust_proxy,
            "Configuration loaded"
        );

        config
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(default)
}

fn parse_var<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {key} value {raw:?}, using default: {default}");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "PROBLEMDESK_DATA_DIR",
            "PROBLEMDESK_PORT",
            "PROBLEMDESK_CONFIRM_WINDOW_DAYS",
            "PROBLEMDESK_MIN_FIELD_CHARS",
            "PROBLEMDESK_USER_ID_START",
            "PROBLEMDESK_SESSION_BACKEND",
            "PROBLEMDESK_TRUST_PROXY",
            "PROBLEMDESK_MAX_UPLOAD_BYTES",
            "PROBLEMDESK_LOGIN_RATE_LIMIT",
            "PROBLEMDESK_LOGIN_RATE_MAX",
            "PROBLEMDESK_LOGIN_RATE_WINDOW",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = AppConfig::from_env();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.confirm_window, chrono::Duration::days(30));
        assert_eq!(config.min_field_chars, 5);
        assert_eq!(config.session_backend, SessionBackend::File);
        assert!(!config.trust_proxy);
        assert_eq!(config.login_rate_limit, Some((20, Duration::from_secs(60))));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("PROBLEMDESK_DATA_DIR", "/srv/desk");
        std::env::set_var("PROBLEMDESK_CONFIRM_WINDOW_DAYS", "7");
        std::env::set_var("PROBLEMDESK_SESSION_BACKEND", "memory");
        std::env::set_var("PROBLEMDESK_TRUST_PROXY", "1");
        std::env::set_var("PROBLEMDESK_LOGIN_RATE_LIMIT", "false");
        std::env::set_var("PROBLEMDESK_USER_ID_START", "0");
        let config = AppConfig::from_env();
        assert_eq!(config.data_dir, PathBuf::from("/srv/desk"));
        assert_eq!(config.confirm_window, chrono::Duration::days(7));
        assert_eq!(config.session_backend, SessionBackend::Memory);
        assert!(config.trust_proxy);
        assert!(config.login_rate_limit.is_none());
        assert_eq!(config.user_id_start, 1);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back() {
        clear_env();
        std::env::set_var("PROBLEMDESK_PORT", "not-a-port");
        std::env::set_var("PROBLEMDESK_MIN_FIELD_CHARS", "-3");
        let config = AppConfig::from_env();
        assert_eq!(config.port, 8080);
        assert_eq!(config.min_field_chars, 5);
        clear_env();
    }
}
