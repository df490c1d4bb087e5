use std::path::PathBuf;

use serde::Deserialize;

use cadence_types::music::{DEFAULT_PPQN, DEFAULT_STEP_DURATION};

use crate::engine::EngineSettings;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    runtime: RuntimeConfig,
}

#[derive(Deserialize, Default)]
struct EngineConfig {
    default_ppqn: Option<i64>,
    default_step_duration: Option<String>,
    seed: Option<u64>,
}

#[derive(Deserialize, Default)]
struct RuntimeConfig {
    cycle_sleep_us: Option<u64>,
    monitor: Option<bool>,
}

pub struct Config {
    engine: EngineConfig,
    runtime: RuntimeConfig,
    /// Problems found while loading, held until logging is up.
    warnings: Vec<String>,
}

impl Config {
    pub fn load() -> Self {
        let Some(path) = user_config_path().filter(|p| p.exists()) else {
            return Self::embedded();
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::with_overrides(&contents, &path.display().to_string()),
            Err(e) => {
                let mut config = Self::embedded();
                config
                    .warnings
                    .push(format!("could not read config {}: {}", path.display(), e));
                config
            }
        }
    }

    /// Logs what went wrong while loading. Call once the logger is installed.
    pub fn report_warnings(&self) {
        for warning in &self.warnings {
            log::warn!(target: "config", "{}", warning);
        }
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn embedded() -> Self {
        let base: ConfigFile =
            toml::from_str(DEFAULT_CONFIG).expect("Failed to parse embedded config.toml");
        Config {
            engine: base.engine,
            runtime: base.runtime,
            warnings: Vec::new(),
        }
    }

    /// Embedded defaults with `contents` merged on top field by field.
    fn with_overrides(contents: &str, origin: &str) -> Self {
        let mut config = Self::embedded();
        match toml::from_str::<ConfigFile>(contents) {
            Ok(user) => {
                merge_engine(&mut config.engine, user.engine);
                merge_runtime(&mut config.runtime, user.runtime);
            }
            Err(e) => config
                .warnings
                .push(format!("ignoring malformed config {}: {}", origin, e)),
        }
        config
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let fallback = EngineSettings::default();
        EngineSettings {
            default_ppqn: self
                .engine
                .default_ppqn
                .filter(|ppqn| *ppqn > 0)
                .unwrap_or(DEFAULT_PPQN),
            default_step_duration: self
                .engine
                .default_step_duration
                .clone()
                .unwrap_or_else(|| DEFAULT_STEP_DURATION.to_string()),
            seed: self.engine.seed.unwrap_or(fallback.seed),
        }
    }

    /// Sleep between engine cycles (clamped to 100..100_000 µs).
    pub fn cycle_sleep_us(&self) -> u64 {
        self.runtime.cycle_sleep_us.unwrap_or(1000).clamp(100, 100_000)
    }

    pub fn monitor(&self) -> bool {
        self.runtime.monitor.unwrap_or(false)
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cadence").join("config.toml"))
}

fn merge_engine(base: &mut EngineConfig, user: EngineConfig) {
    if user.default_ppqn.is_some() {
        base.default_ppqn = user.default_ppqn;
    }
    if user.default_step_duration.is_some() {
        base.default_step_duration = user.default_step_duration;
    }
    if user.seed.is_some() {
        base.seed = user.seed;
    }
}

fn merge_runtime(base: &mut RuntimeConfig, user: RuntimeConfig) {
    if user.cycle_sleep_us.is_some() {
        base.cycle_sleep_us = user.cycle_sleep_us;
    }
    if user.monitor.is_some() {
        base.monitor = user.monitor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_embedded_config() {
        let config = Config::embedded();
        let settings = config.engine_settings();
        assert_eq!(settings.default_ppqn, 24);
        assert_eq!(settings.default_step_duration, "1/16");
        assert_eq!(settings.seed, 1);
        assert_eq!(config.cycle_sleep_us(), 1000);
        assert!(!config.monitor());
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn test_user_overrides_single_field() {
        let config = Config::with_overrides("[engine]\ndefault_ppqn = 96\n", "test");
        let settings = config.engine_settings();
        assert_eq!(settings.default_ppqn, 96);
        assert_eq!(settings.default_step_duration, "1/16");
        assert_eq!(config.cycle_sleep_us(), 1000);
    }

    #[test]
    fn test_malformed_user_config_ignored() {
        let config = Config::with_overrides("[runtime\nmonitor = yes", "test");
        assert!(!config.monitor());
        assert_eq!(config.engine_settings().default_ppqn, 24);
        assert_eq!(config.warnings().len(), 1);
        assert!(config.warnings()[0].starts_with("ignoring malformed config test"));
    }

    #[test]
    fn test_cycle_sleep_clamped() {
        let config = Config::with_overrides("[runtime]\ncycle_sleep_us = 1\n", "test");
        assert_eq!(config.cycle_sleep_us(), 100);
    }
}
