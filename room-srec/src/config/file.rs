//! `config.txt` backed configuration store.
//!
//! The file holds one `key = value` pair per line. Lines starting with `#`
//! or without `=` are ignored, and unknown keys are reported and skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{info, warn};

use super::keys;
use super::provider::ConfigProvider;
use crate::{Error, Result};

/// Default values seeded before the file is read.
pub const DEFAULTS: &[(&str, &str)] = &[
    (keys::DEBUG, "false"),
    (keys::CHECK_PERIOD, "30"),
    (keys::CHECK_PERIOD_RANDOM_OFFSET, "10"),
    (keys::IMPORTANT_CHECK_PERIOD, "3"),
    (keys::IMPORTANT_CHECK_PERIOD_RANDOM_OFFSET, "3"),
    (keys::CHECK_THREADS, "1"),
    (keys::CHECK_WAIT, "0.5"),
    (keys::TICK_INTERVAL, "0.5"),
    (keys::PROBE_TIMEOUT, "10"),
    (keys::RECORDER_START_TIMEOUT, "10"),
    (keys::RECORDER_STOP_TIMEOUT, "10"),
    (keys::OUTPUT_DIR, "download"),
];

/// Every key the store accepts, including those without a default.
pub const KNOWN_KEYS: &[&str] = &[
    keys::DEBUG,
    keys::CHECK_PERIOD,
    keys::CHECK_PERIOD_RANDOM_OFFSET,
    keys::IMPORTANT_CHECK_PERIOD,
    keys::IMPORTANT_CHECK_PERIOD_RANDOM_OFFSET,
    keys::CHECK_THREADS,
    keys::CHECK_WAIT,
    keys::TICK_INTERVAL,
    keys::PROBE_TIMEOUT,
    keys::RECORDER_START_TIMEOUT,
    keys::RECORDER_STOP_TIMEOUT,
    keys::PROBE_COMMAND,
    keys::RECORDER_COMMAND,
    keys::RECORDER_SIDE_CHANNEL_ARGS,
    keys::OUTPUT_DIR,
];

/// Configuration loaded from a `config.txt` file.
pub struct FileConfigStore {
    path: PathBuf,
    values: RwLock<HashMap<String, String>>,
}

impl FileConfigStore {
    /// Load the store from `path`.
    ///
    /// A missing file is a fatal configuration error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        info!(path = %path.display(), "Reading configs");

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::config_missing(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self::from_content(path, &content))
    }

    /// Build a store from file content without touching the filesystem.
    pub fn from_content(path: impl Into<PathBuf>, content: &str) -> Self {
        let mut values: HashMap<String, String> = DEFAULTS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        for (key, value) in parse_lines(content) {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                warn!("Unsupported config {} = {}", key, value);
                continue;
            }
            info!("Config {} = {}", key, value);
            values.insert(key, value);
        }

        Self {
            path: path.into(),
            values: RwLock::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Update a value and persist it to the backing file.
    ///
    /// The matching `key = value` line is rewritten in place; the pair is
    /// appended when the file has no such line.
    pub fn set(&self, key: &str, value: impl ToString) -> Result<()> {
        if !KNOWN_KEYS.contains(&key) {
            return Err(Error::config(format!("unsupported config key: {}", key)));
        }
        let value = value.to_string();

        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        std::fs::write(&self.path, rewrite_line(&content, key, &value))?;

        self.values.write().insert(key.to_string(), value.clone());
        info!("Set config {} = {}", key, value);
        Ok(())
    }
}

impl ConfigProvider for FileConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }
}

fn parse_lines(content: &str) -> impl Iterator<Item = (String, String)> + '_ {
    content.lines().filter_map(|line| {
        if line.trim().starts_with('#') {
            return None;
        }
        let (key, value) = line.split_once('=')?;
        Some((key.trim().to_string(), value.trim().to_string()))
    })
}

fn rewrite_line(content: &str, key: &str, value: &str) -> String {
    let replacement = format!("{} = {}", key, value);
    let mut found = false;

    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            let matches = line
                .split_once('=')
                .is_some_and(|(k, _)| k.trim() == key && !line.trim().starts_with('#'));
            if matches {
                found = true;
                replacement.clone()
            } else {
                line.to_string()
            }
        })
        .collect();

    if !found {
        lines.push(replacement);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
