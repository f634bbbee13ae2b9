//! Configuration module.
//!
//! Provides key/value configuration providers and the typed
//! [`SchedulerConfig`] built from them.

mod file;
mod provider;
mod settings;

pub use file::{DEFAULTS, FileConfigStore, KNOWN_KEYS};
pub use provider::{ConfigProvider, ConfigProviderExt, ENV_PREFIX, EnvOverlay, MemoryConfig};
pub use settings::{MAX_DURATION, SchedulerConfig, keys};
