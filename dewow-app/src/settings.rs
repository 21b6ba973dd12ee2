//! Persistent settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use dewow_core::{BlockFraming, EngineConfig, ResampleConfig, TraceConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Nominal reference tone frequency (Hz). Must be set here or on the
    /// command line before anything runs.
    pub nominal_frequency: Option<f64>,
    pub trace_channel: usize,
    pub channels: Vec<usize>,
    pub framing: BlockFraming,
    pub trace: TraceConfig,
    pub resample: ResampleConfig,
    /// Write `.npy` curves next to the traced file.
    pub persist_curves: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            nominal_frequency: None,
            trace_channel: 0,
            channels: vec![0],
            framing: BlockFraming::default(),
            trace: TraceConfig::default(),
            resample: ResampleConfig::default(),
            persist_curves: true,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.nominal_frequency = self
            .nominal_frequency
            .filter(|f| f.is_finite() && *f > 0.0);
        self.channels.sort_unstable();
        self.channels.dedup();
        if self.channels.is_empty() {
            self.channels.push(0);
        }
        self.trace.tolerance = self.trace.tolerance.abs();
    }

    /// Engine configuration for a run. Range checks are left to
    /// `EngineConfig::validate`.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let Some(nominal_frequency) = self.nominal_frequency else {
            bail!("no nominal reference frequency; pass --nominal or set nominalFrequency");
        };
        Ok(EngineConfig {
            nominal_frequency,
            framing: self.framing,
            trace: self.trace.clone(),
            resample: self.resample.clone(),
        })
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dewow")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("dewow")
            .join("settings.json")
    }
}

/// Missing files yield defaults; unreadable ones are logged and ignored.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<AppSettings>(&raw).unwrap_or_else(|err| {
            warn!(path = %path.display(), %err, "ignoring malformed settings file");
            AppSettings::default()
        }),
        Err(_) => AppSettings::default(),
    };
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
