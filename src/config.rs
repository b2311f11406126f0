//! Server settings.
//!
//! Read once at boot from `settings.json` (copied next to the binary by
//! build.rs). `TASKGATE_SETTINGS` points at a different file and
//! `TASKGATE_JWT_SECRET` overrides the signing secret.

use serde::Deserialize;
use std::{fs, path::Path};
use thiserror::Error;

pub const SETTINGS_FILENAME: &str = "settings.json";
pub const SETTINGS_PATH_VAR: &str = "TASKGATE_SETTINGS";
pub const JWT_SECRET_VAR: &str = "TASKGATE_JWT_SECRET";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub tcp_socket_binding: String,
    pub tcp_socket_port: u16,
    pub database_path: String,
    #[serde(default)]
    pub static_dir: Option<String>,
    pub jwt_secret: String,
    pub jwt_expiration_in_minutes: u32,
    pub default_admin_username: String,
    pub default_admin_password: String,
    pub default_admin_email: String,
    pub mail_sender: String,
    /// Frontend origin allowed by CORS. Any origin when unset.
    #[serde(default)]
    pub allowed_origin: Option<String>,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse settings file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid setting {0}")]
    Invalid(&'static str),
}

impl Settings {
    /// Load from `$TASKGATE_SETTINGS`, falling back to `settings.json`.
    pub fn load() -> Result<Settings, SettingsError> {
        let path = std::env::var(SETTINGS_PATH_VAR)
            .unwrap_or_else(|_| SETTINGS_FILENAME.to_string());
        let mut settings = Settings::load_from(&path)?;

        if let Ok(secret) = std::env::var(JWT_SECRET_VAR) {
            settings.jwt_secret = secret;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Settings, SettingsError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.jwt_secret.is_empty() {
            return Err(SettingsError::Invalid("jwt_secret"));
        }
        if self.jwt_expiration_in_minutes == 0 {
            return Err(SettingsError::Invalid("jwt_expiration_in_minutes"));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.tcp_socket_binding, self.tcp_socket_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "tcp_socket_binding": "127.0.0.1",
        "tcp_socket_port": 5050,
        "database_path": "test.redb",
        "jwt_secret": "s3cret",
        "jwt_expiration_in_minutes": 60,
        "default_admin_username": "root",
        "default_admin_password": "root",
        "default_admin_email": "root@example.com",
        "mail_sender": "Tasks <tasks@example.com>"
    }"#;

    #[test]
    fn load_from_file_with_optional_fields_missing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.bind_address(), "127.0.0.1:5050");
        assert_eq!(settings.static_dir, None);
        assert_eq!(settings.allowed_origin, None);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Settings::load_from("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();

        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn empty_secret_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.replace("s3cret", "").as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert!(matches!(settings.validate(), Err(SettingsError::Invalid("jwt_secret"))));
    }
}
