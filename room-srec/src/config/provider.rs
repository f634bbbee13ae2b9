//! Key/value configuration providers.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use parking_lot::RwLock;

use crate::{Error, Result};

/// Prefix of environment variables that override configuration keys.
pub const ENV_PREFIX: &str = "SREC_";

/// Read-mostly key/value configuration source.
pub trait ConfigProvider: Send + Sync {
    /// Raw string value for `key`, if present.
    fn get(&self, key: &str) -> Option<String>;
}

/// Typed accessors over any [`ConfigProvider`].
pub trait ConfigProviderExt: ConfigProvider {
    /// Parse a required value.
    fn require<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.get(key).ok_or_else(|| Error::config_missing(key))?;
        raw.trim()
            .parse::<T>()
            .map_err(|e| Error::config(format!("invalid value for {}: {:?} ({})", key, raw, e)))
    }

    /// Parse an optional value, falling back to `default` when absent.
    fn get_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(_) => self.require(key),
            None => Ok(default),
        }
    }

    /// Booleans are true only for a case-insensitive `true`.
    fn require_bool(&self, key: &str) -> Result<bool> {
        let raw = self.get(key).ok_or_else(|| Error::config_missing(key))?;
        Ok(raw.trim().eq_ignore_ascii_case("true"))
    }

    /// A non-negative number of seconds, fractions allowed.
    fn require_secs(&self, key: &str) -> Result<Duration> {
        let secs: f64 = self.require(key)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(Error::config(format!(
                "{} must be a non-negative number of seconds, got {}",
                key, secs
            )));
        }
        Duration::try_from_secs_f64(secs)
            .map_err(|e| Error::config(format!("{} is out of range: {} ({})", key, secs, e)))
    }
}

impl<P: ConfigProvider + ?Sized> ConfigProviderExt for P {}

/// In-memory provider without defaults.
#[derive(Debug, Default)]
pub struct MemoryConfig {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: impl Into<String>, value: impl ToString) {
        self.values.write().insert(key.into(), value.to_string());
    }
}

impl ConfigProvider for MemoryConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }
}

/// Overlays `SREC_<KEY>` environment variables on top of another provider.
pub struct EnvOverlay<P> {
    inner: P,
    vars: HashMap<String, String>,
}

impl<P: ConfigProvider> EnvOverlay<P> {
    /// Capture the current process environment.
    pub fn from_env(inner: P) -> Self {
        Self::from_vars(inner, std::env::vars())
    }

    /// Use an explicit set of variables.
    pub fn from_vars(inner: P, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let vars = vars
            .into_iter()
            .filter(|(name, _)| name.starts_with(ENV_PREFIX))
            .collect();
        Self { inner, vars }
    }
}

impl<P: ConfigProvider> ConfigProvider for EnvOverlay<P> {
    fn get(&self, key: &str) -> Option<String> {
        let name = format!("{}{}", ENV_PREFIX, key.to_uppercase());
        self.vars
            .get(&name)
            .cloned()
            .or_else(|| self.inner.get(key))
    }
}
