// ⚙️ Settings - environment driven configuration
// Every knob has a default so a bare `fast-distrib match` works out of the box.

use crate::error::{DistribError, Result};
use serde::Serialize;
use std::env;
use std::path::PathBuf;

// ============================================================================
// SMTP SETTINGS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// STARTTLS when true, plain SMTP otherwise
    pub use_tls: bool,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub from: String,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        SmtpSettings {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            use_tls: true,
            username: None,
            password: None,
            from: "noreply@localhost".to_string(),
        }
    }
}

// ============================================================================
// APPLICATION SETTINGS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Root for stored recipient files (`sending_files/` lives below it)
    pub media_root: PathBuf,

    /// Public URL prefix used to build absolute download links in emails
    pub base_url: String,

    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Bearer token guarding the admin API. None disables the admin API.
    #[serde(skip_serializing)]
    pub admin_token: Option<String>,

    pub smtp: SmtpSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_path: PathBuf::from("fastdistrib.db"),
            media_root: PathBuf::from("media"),
            base_url: "http://localhost:3000".to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
            admin_token: None,
            smtp: SmtpSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through an arbitrary lookup (used by tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("EMAIL_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| DistribError::Config(format!("EMAIL_PORT is not a port: {}", raw)))?,
            None => defaults.smtp.port,
        };

        let use_tls = match get("EMAIL_USE_TLS") {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| DistribError::Config(format!("EMAIL_USE_TLS is not a boolean: {}", raw)))?,
            None => defaults.smtp.use_tls,
        };

        let base_url = get("DISTRIB_BASE_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or(defaults.base_url);

        Ok(Settings {
            database_path: get("DISTRIB_DATABASE")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            media_root: get("DISTRIB_MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_root),
            base_url,
            bind_addr: get("DISTRIB_BIND").unwrap_or(defaults.bind_addr),
            admin_token: get("ADMIN_TOKEN"),
            smtp: SmtpSettings {
                host: get("EMAIL_HOST").unwrap_or(defaults.smtp.host),
                port,
                use_tls,
                username: get("EMAIL_HOST_USER"),
                password: get("EMAIL_HOST_PASSWORD"),
                from: get("DEFAULT_FROM_EMAIL").unwrap_or(defaults.smtp.from),
            },
        })
    }

    /// Directory where the files of one group are stored
    pub fn group_storage_dir(&self, group_id: i64) -> PathBuf {
        crate::distribution::group_storage_dir(&self.media_root, group_id)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_empty() {
        let settings = Settings::from_lookup(|_| None).unwrap();

        assert_eq!(settings.database_path, PathBuf::from("fastdistrib.db"));
        assert_eq!(settings.smtp.host, "smtp.gmail.com");
        assert_eq!(settings.smtp.port, 587);
        assert!(settings.smtp.use_tls);
        assert!(settings.admin_token.is_none());
    }

    #[test]
    fn test_overrides_are_applied() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("DISTRIB_DATABASE", "/tmp/x.db"),
            ("DISTRIB_BASE_URL", "https://files.example.org/"),
            ("EMAIL_PORT", "2525"),
            ("EMAIL_USE_TLS", "False"),
            ("ADMIN_TOKEN", "s3cret"),
        ]))
        .unwrap();

        assert_eq!(settings.database_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(settings.base_url, "https://files.example.org");
        assert_eq!(settings.smtp.port, 2525);
        assert!(!settings.smtp.use_tls);
        assert_eq!(settings.admin_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let settings = Settings::from_lookup(lookup_from(&[("ADMIN_TOKEN", "  ")])).unwrap();
        assert!(settings.admin_token.is_none());
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let result = Settings::from_lookup(lookup_from(&[("EMAIL_PORT", "smtp")]));
        assert!(matches!(result, Err(DistribError::Config(_))));
    }

    #[test]
    fn test_group_storage_dir() {
        let settings = Settings::default();
        assert_eq!(
            settings.group_storage_dir(7),
            PathBuf::from("media").join("sending_files").join("7")
        );
    }
}
