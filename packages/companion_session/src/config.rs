use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channel::Endpoint;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [session]
//                    stall_timeout_secs = 60
//
//   env var:         COMPANION_SESSION__STALL_TIMEOUT_SECS=60   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Where the backend lives (under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// Session behaviour knobs (under `[session]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default = "default_naming_animation_ms")]
    pub naming_animation_ms: u64,
    /// 0 disables auto-finalization of stalled streams
    #[serde(default)]
    pub stall_timeout_secs: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            naming_animation_ms: default_naming_animation_ms(),
            stall_timeout_secs: 0,
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_base_url() -> String {
    "ws://localhost:8000/api/v1".to_string()
}
fn default_naming_animation_ms() -> u64 {
    3000
}
fn default_event_buffer() -> usize {
    256
}

/// Default config file location: `<config_dir>/companion/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("companion").join("config.toml"))
}

/// Build a figment that layers: defaults → config.toml → COMPANION_* env vars.
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("COMPANION_").split("__"))
}

// =============================================================================
// Runtime view
// =============================================================================

/// Session behaviour (runtime view).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long `naming_animation_active` stays on after a name reveal
    pub naming_animation: Duration,
    /// Finalize a stream that received no token for this long (None = never)
    pub stall_timeout: Option<Duration>,
    /// Capacity of the inbound channel event queue
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_file(&SessionFileConfig::default())
    }
}

impl SessionConfig {
    pub fn from_file(fc: &SessionFileConfig) -> Self {
        Self {
            naming_animation: Duration::from_millis(fc.naming_animation_ms),
            stall_timeout: if fc.stall_timeout_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(fc.stall_timeout_secs))
            },
            event_buffer: fc.event_buffer.max(1),
        }
    }
}

impl Endpoint {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        Endpoint::new(fc.base_url.clone())
    }
}
