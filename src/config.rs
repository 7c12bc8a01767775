//! Configuration management for the dehydratord daemon.
//!
//! Handles loading, parsing, and validation of the YAML configuration file
//! that defines controller tuning, the drying program and the simulated
//! chamber.

use anyhow::{Context, Result, bail, ensure};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::RwLock;

use crate::{
    controller::{ControllerSettings, run_duration_from_secs},
    pid::PidSettings,
};

/// Main configuration structure for the dehydratord daemon.
///
/// Every section is optional; missing fields take their defaults.
///
/// # Example
///
/// ```yaml
/// version: 1
/// status_interval_secs: 30
///
/// control:
///   pid:
///     proportional_gain: 0.5
///     integral_time_minutes: 0.55
///   poll_interval_ms: 2000
///   heater_start_frequency_hz: 0.2
///
/// program:
///   target_temperature: 57
///   run_duration_secs: 28800
///   cooldown_seconds: 120
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    /// Interval between status lines in seconds.
    #[serde(default = "defaults::status_interval_secs")]
    pub status_interval_secs: u16,

    #[serde(default)]
    pub control: ControlCfg,

    #[serde(default)]
    pub program: ProgramCfg,

    #[serde(default)]
    pub simulation: SimulationCfg,
}

/// Controller tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlCfg {
    pub pid: PidSettings,

    /// Period between regulation passes in milliseconds.
    pub poll_interval_ms: u64,

    /// Heater PWM frequency applied when a run starts.
    pub heater_start_frequency_hz: f32,

    /// End a timed run when its duration elapses instead of only reporting it.
    pub stop_on_timer_elapsed: bool,

    /// Fan cooldown after a timed run ends on its own.
    pub timer_cooldown_seconds: u32,
}

impl Default for ControlCfg {
    fn default() -> Self {
        let settings = ControllerSettings::default();
        Self {
            pid: settings.pid,
            poll_interval_ms: u64::try_from(settings.poll_interval.as_millis())
                .unwrap_or(u64::MAX),
            heater_start_frequency_hz: settings.heater_start_frequency_hz,
            stop_on_timer_elapsed: settings.stop_on_timer_elapsed,
            timer_cooldown_seconds: settings.timer_cooldown_seconds,
        }
    }
}

impl From<&ControlCfg> for ControllerSettings {
    fn from(cfg: &ControlCfg) -> Self {
        Self {
            pid: cfg.pid,
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            heater_start_frequency_hz: cfg.heater_start_frequency_hz,
            stop_on_timer_elapsed: cfg.stop_on_timer_elapsed,
            timer_cooldown_seconds: cfg.timer_cooldown_seconds,
        }
    }
}

/// The drying program run by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramCfg {
    /// Chamber temperature to hold, in °C.
    pub target_temperature: f32,

    /// Run length in seconds; zero runs until the daemon is stopped.
    pub run_duration_secs: f64,

    /// How long the fan keeps running after heating stops.
    pub cooldown_seconds: u32,

    /// Exit once a finished run has cooled down.
    pub exit_when_done: bool,
}

impl Default for ProgramCfg {
    fn default() -> Self {
        Self {
            target_temperature: 57.0,
            run_duration_secs: 0.0,
            cooldown_seconds: 60,
            exit_when_done: true,
        }
    }
}

impl ProgramCfg {
    pub fn run_duration(&self) -> Result<Duration> {
        Ok(run_duration_from_secs(self.run_duration_secs)?)
    }
}

/// Parameters of the simulated chamber.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationCfg {
    /// Room temperature in °C.
    pub ambient_temperature: f32,

    /// Chamber temperature at startup; ambient when unset.
    pub initial_temperature: Option<f32>,

    /// Heating rate with the heater relay closed, in °C per second.
    pub heater_power: f32,

    /// Fraction of the excess over ambient lost per second, fan off.
    pub heat_loss: f32,

    /// Fraction of the excess over ambient lost per second, fan on.
    pub fan_heat_loss: f32,

    /// Half-width of the uniform probe noise in °C.
    pub sensor_noise: f32,
}

impl Default for SimulationCfg {
    fn default() -> Self {
        Self {
            ambient_temperature: 22.0,
            initial_temperature: None,
            heater_power: 0.5,
            heat_loss: 0.005,
            fan_heat_loss: 0.008,
            sensor_noise: 0.25,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            status_interval_secs: defaults::status_interval_secs(),
            control: ControlCfg::default(),
            program: ProgramCfg::default(),
            simulation: SimulationCfg::default(),
        }
    }
}

impl Config {
    /// Validates the configuration for consistency.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use dehydratord::config::Config;
    ///
    /// let config = Config::default();
    /// config.validate()?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            bail!("Unsupported config version {}", self.version);
        }
        ensure!(
            self.status_interval_secs > 0,
            "status_interval_secs must be positive"
        );

        let pid = &self.control.pid;
        for (name, value) in [
            ("proportional_gain", pid.proportional_gain),
            ("integral_time_minutes", pid.integral_time_minutes),
            ("derivative_time_minutes", pid.derivative_time_minutes),
        ] {
            ensure!(
                value.is_finite() && value >= 0.0,
                "control.pid.{name} must be a non-negative number, got {value}"
            );
        }
        ensure!(
            pid.output_min.is_finite() && pid.output_max.is_finite(),
            "control.pid output range must be finite"
        );
        ensure!(
            pid.output_min < pid.output_max,
            "control.pid.output_min ({}) must be below output_max ({})",
            pid.output_min,
            pid.output_max
        );
        ensure!(
            pid.output_min >= 0.0 && pid.output_max <= 1.0,
            "control.pid output range must lie within [0, 1] to be usable as a duty cycle"
        );
        ensure!(
            self.control.poll_interval_ms > 0,
            "control.poll_interval_ms must be positive"
        );
        let hz = self.control.heater_start_frequency_hz;
        ensure!(
            hz.is_finite() && hz > 0.0,
            "control.heater_start_frequency_hz must be positive, got {hz}"
        );

        ensure!(
            self.program.target_temperature.is_finite(),
            "program.target_temperature must be a number"
        );
        self.program
            .run_duration()
            .context("Invalid program.run_duration_secs")?;

        let sim = &self.simulation;
        ensure!(
            sim.ambient_temperature.is_finite()
                && sim.initial_temperature.is_none_or(f32::is_finite),
            "simulation temperatures must be numbers"
        );
        ensure!(
            sim.heater_power.is_finite() && sim.heater_power >= 0.0,
            "simulation.heater_power must be non-negative"
        );
        for (name, value) in [
            ("heat_loss", sim.heat_loss),
            ("fan_heat_loss", sim.fan_heat_loss),
        ] {
            ensure!(
                value.is_finite() && value > 0.0,
                "simulation.{name} must be positive, got {value}"
            );
        }
        ensure!(
            sim.sensor_noise.is_finite() && sim.sensor_noise >= 0.0,
            "simulation.sensor_noise must be non-negative"
        );

        Ok(())
    }

    /// Longest fan cooldown a shutdown may have to wait out.
    pub fn longest_cooldown(&self) -> Duration {
        let seconds = self
            .program
            .cooldown_seconds
            .max(self.control.timer_cooldown_seconds);
        Duration::from_secs(u64::from(seconds))
    }
}

mod defaults {
    /// Default status interval in seconds.
    pub fn status_interval_secs() -> u16 {
        30
    }
}

const CONFIG_ENV: &str = "DEHYDRATORD_CONFIG";

fn locate_config() -> Option<PathBuf> {
    if let Some(env_path) = env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("dehydratord/config.yml");
        if cfg_dir.exists() {
            return Some(cfg_dir);
        }
    }

    let etc = Path::new("/etc/dehydratord/config.yml");
    etc.exists().then(|| etc.to_path_buf())
}

/// Configuration manager that owns the active configuration and where it came
/// from.
///
/// # Example
///
/// ```no_run
/// use dehydratord::config::ConfigManager;
/// use std::path::PathBuf;
///
/// # async fn example() -> anyhow::Result<()> {
/// // Load from specific path
/// let config_manager = ConfigManager::load(Some(PathBuf::from("config.yml"))).await?;
///
/// // Standard locations, or built-in defaults
/// let config_manager = ConfigManager::load_or_default(None).await?;
///
/// let target = config_manager.get().await.program.target_temperature;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    path: Option<PathBuf>,
}

impl ConfigManager {
    /// Creates a new ConfigManager with the given config and source path.
    pub fn new(config: Config, path: Option<PathBuf>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// Loads configuration from file or standard locations.
    ///
    /// Searches for configuration in the following order:
    /// 1. Provided path parameter
    /// 2. DEHYDRATORD_CONFIG environment variable
    /// 3. XDG_CONFIG_HOME/dehydratord/config.yml or ~/.config/dehydratord/config.yml
    /// 4. /etc/dehydratord/config.yml
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path.or_else(locate_config) {
            Some(p) => p,
            None => bail!("Configuration file not found in any standard location"),
        };

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path)?;

        Ok(Self::new(config, Some(config_path)))
    }

    /// Like [`load`](Self::load), but falls back to built-in defaults when no
    /// file is given and none exists in the standard locations.
    pub async fn load_or_default(path: Option<PathBuf>) -> Result<Self> {
        if path.is_some() || locate_config().is_some() {
            return Self::load(path).await;
        }
        info!("No configuration file found, using built-in defaults");
        Ok(Self::new(Config::default(), None))
    }

    /// Gets a read-only reference to the current configuration.
    pub async fn get(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config.read().await
    }

    /// Returns the file the configuration was read from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Clones the current configuration.
    pub async fn clone_config(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Replaces the configuration after validating it.
    pub async fn update_config(&self, new_config: Config) -> Result<()> {
        new_config
            .validate()
            .context("New configuration is invalid")?;
        *self.config.write().await = new_config;
        info!("Configuration updated in memory");
        Ok(())
    }

    fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid configuration in: {}", path.display()))?;

        Ok(config)
    }

    fn parse(content: &str) -> Result<Config> {
        let config: Config = serde_yaml::from_str(content).context("Failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[tokio::test]
    async fn load_valid_yaml() {
        let file = create_temp_config(
            r#"
version: 1
status_interval_secs: 10
control:
  pid:
    proportional_gain: 0.8
    output_max: 0.9
  poll_interval_ms: 500
  stop_on_timer_elapsed: false
program:
  target_temperature: 63.5
  run_duration_secs: 5400
  cooldown_seconds: 120
simulation:
  ambient_temperature: 18
  sensor_noise: 0
"#,
        );

        let manager = ConfigManager::load(Some(file.path().to_path_buf()))
            .await
            .unwrap();
        let config = manager.get().await;

        assert_eq!(config.status_interval_secs, 10);
        assert_eq!(config.control.pid.proportional_gain, 0.8);
        assert_eq!(config.control.pid.output_max, 0.9);
        assert_eq!(config.control.pid.integral_time_minutes, 0.55);
        assert!(!config.control.stop_on_timer_elapsed);
        assert_eq!(config.program.target_temperature, 63.5);
        assert_eq!(
            config.program.run_duration().unwrap(),
            Duration::from_secs(5400)
        );
        assert_eq!(config.program.cooldown_seconds, 120);
        assert!(config.program.exit_when_done);
        assert_eq!(config.simulation.ambient_temperature, 18.0);
        assert_eq!(config.simulation.sensor_noise, 0.0);
        assert_eq!(manager.path(), Some(file.path()));
    }

    #[test]
    fn minimal_file_uses_defaults() {
        let config = ConfigManager::parse("version: 1\n").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn control_section_maps_to_controller_settings() {
        let cfg = ControlCfg {
            poll_interval_ms: 250,
            heater_start_frequency_hz: 1.0,
            ..ControlCfg::default()
        };
        let settings = ControllerSettings::from(&cfg);

        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.heater_start_frequency_hz, 1.0);
        assert_eq!(settings.pid, PidSettings::default());
    }

    #[test]
    fn default_control_matches_controller_defaults() {
        assert_eq!(
            ControllerSettings::from(&ControlCfg::default()),
            ControllerSettings::default()
        );
    }

    #[test]
    fn longest_cooldown_covers_both_stop_paths() {
        let mut config = Config::default();
        config.program.cooldown_seconds = 30;
        config.control.timer_cooldown_seconds = 90;
        assert_eq!(config.longest_cooldown(), Duration::from_secs(90));
    }

    #[test]
    fn rejects_unsupported_version() {
        let err = ConfigManager::parse("version: 2\n").unwrap_err();
        assert!(err.to_string().contains("version 2"), "{err:#}");
    }

    #[test]
    fn rejects_inverted_output_range() {
        let mut config = Config::default();
        config.control.pid.output_min = 0.8;
        config.control.pid.output_max = 0.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_values() {
        let cases: [fn(&mut Config); 7] = [
            |c| c.control.poll_interval_ms = 0,
            |c| c.control.heater_start_frequency_hz = 0.0,
            |c| c.control.pid.proportional_gain = f32::NAN,
            |c| c.program.run_duration_secs = -5.0,
            |c| c.program.target_temperature = f32::INFINITY,
            |c| c.simulation.fan_heat_loss = 0.0,
            |c| c.status_interval_secs = 0,
        ];

        for (i, mutate) in cases.iter().enumerate() {
            let mut config = Config::default();
            mutate(&mut config);
            assert!(config.validate().is_err(), "case {i} accepted");
        }
    }

    #[tokio::test]
    async fn load_reports_parse_errors_with_path() {
        let file = create_temp_config("version: [1\n");
        let err = ConfigManager::load(Some(file.path().to_path_buf()))
            .await
            .unwrap_err();
        assert!(
            format!("{err:#}").contains(&file.path().display().to_string()),
            "{err:#}"
        );
    }

    #[tokio::test]
    async fn load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigManager::load(Some(dir.path().join("absent.yml"))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn update_config_validates() {
        let manager = ConfigManager::new(Config::default(), None);

        let mut next = manager.clone_config().await;
        next.program.target_temperature = 70.0;
        manager.update_config(next).await.unwrap();
        assert_eq!(manager.get().await.program.target_temperature, 70.0);

        let mut bad = manager.clone_config().await;
        bad.control.poll_interval_ms = 0;
        assert!(manager.update_config(bad).await.is_err());
        assert_eq!(manager.get().await.control.poll_interval_ms, 2000);
    }

    #[test]
    fn config_serializes_to_yaml() {
        let yaml = serde_yaml::to_string(&Config::default()).unwrap();
        assert!(yaml.contains("target_temperature: 57.0"), "{yaml}");
        assert_eq!(ConfigManager::parse(&yaml).unwrap(), Config::default());
    }
}
