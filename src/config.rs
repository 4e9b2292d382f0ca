//! Konfiguration des Call-Cores
//!
//! Alle Felder haben Defaults; Umgebungsvariablen überschreiben einzelne Werte.

use crate::codec::HardwareAcceleration;
use crate::connection::{default_ice_servers, ConnectionSettings, IceServerConfig, ReconnectPolicy};
use crate::media::MediaBackendKind;
use crate::storage::{CodecPreference, SqliteStorage, StorageBackend};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Standard Signaling URL (kann über `PULSE_SIGNALING_URL` überschrieben werden)
pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:8080/ws";

const DATABASE_FILE: &str = "pulse-rtc.db";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid signaling URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

// ============================================================================
// RTC CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RtcConfig {
    pub signaling_url: String,
    pub ice_servers: Vec<IceServerConfig>,
    pub reconnect: ReconnectPolicy,
    /// ICE-Restarts pro Peer bevor er als gescheitert gilt
    pub ice_retry_budget: u32,
    pub storage: StorageBackend,
    pub media_backend: MediaBackendKind,
    pub codec_preference: CodecPreference,
    /// Zielverzeichnis für Aufnahmen (`None` = Datenverzeichnis der App)
    pub recordings_dir: Option<PathBuf>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            ice_servers: default_ice_servers(),
            reconnect: ReconnectPolicy::default(),
            ice_retry_budget: ConnectionSettings::default().ice_retry_budget,
            storage: StorageBackend::default(),
            media_backend: MediaBackendKind::default(),
            codec_preference: CodecPreference::default(),
            recordings_dir: None,
        }
    }
}

impl RtcConfig {
    /// Defaults plus Umgebungsvariablen
    ///
    /// - `PULSE_SIGNALING_URL`
    /// - `PULSE_DATA_DIR` (Datenbank und Aufnahmen)
    /// - `PULSE_STORAGE` = `sqlite` | `memory`
    /// - `PULSE_ICE_RETRY_BUDGET`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("PULSE_SIGNALING_URL") {
            config.signaling_url = url;
        }

        let data_dir = lookup("PULSE_DATA_DIR").map(PathBuf::from);
        if let Some(dir) = &data_dir {
            config.storage = StorageBackend::Sqlite {
                path: dir.join(DATABASE_FILE),
            };
            config.recordings_dir = Some(dir.join("recordings"));
        }

        if let Some(storage) = lookup("PULSE_STORAGE") {
            config.storage = match storage.trim().to_ascii_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "sqlite" => match &data_dir {
                    Some(dir) => StorageBackend::Sqlite {
                        path: dir.join(DATABASE_FILE),
                    },
                    None => StorageBackend::default(),
                },
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "PULSE_STORAGE",
                        value: storage,
                    })
                }
            };
        }

        if let Some(budget) = lookup("PULSE_ICE_RETRY_BUDGET") {
            config.ice_retry_budget =
                budget
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "PULSE_ICE_RETRY_BUDGET",
                        value: budget.clone(),
                    })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Prüft die Signaling URL (ws/wss/http/https)
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUrl {
            url: self.signaling_url.clone(),
            reason,
        };

        let url = url::Url::parse(&self.signaling_url).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" | "http" | "https" => {}
            other => return Err(invalid(format!("unsupported scheme '{}'", other))),
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(())
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            ice_retry_budget: self.ice_retry_budget,
            reconnect: self.reconnect.clone(),
            ..Default::default()
        }
    }

    /// Bevorzugter Codec-Pfad für neue Encoder/Decoder-Konfigurationen
    pub fn hardware_acceleration(&self) -> HardwareAcceleration {
        match self.codec_preference {
            CodecPreference::Hardware => HardwareAcceleration::PreferHardware,
            CodecPreference::Software => HardwareAcceleration::PreferSoftware,
        }
    }

    /// Verzeichnis für Aufnahmen
    pub fn recordings_dir(&self) -> PathBuf {
        if let Some(dir) = &self.recordings_dir {
            return dir.clone();
        }
        SqliteStorage::default_path()
            .ok()
            .and_then(|db| db.parent().map(|p| p.join("recordings")))
            .unwrap_or_else(|| std::env::temp_dir().join("pulse-rtc").join("recordings"))
    }
}

// ============================================================================
// TESTS
// ============================================================================
