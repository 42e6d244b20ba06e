//! Configuration loading with file, environment and validation layers

use crate::config::{CrashSettings, LotterySettings, SessionSettings, WagerConfig};
use crate::errors::{ConfigurationError, WagerResult};
use std::env;
use std::path::Path;

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> WagerResult<WagerConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => WagerConfig::default(),
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> WagerResult<WagerConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(&self, config: &mut WagerConfig) -> WagerResult<()> {
        if let Ok(filter) = env::var("WAGERHUB_LOG") {
            config.logging.filter = filter;
        }
        if let Some(rake) = parse_env::<u32>("WAGERHUB_CRASH_RAKE")? {
            config.crash.rake = rake;
        }
        if let Some(max_bet) = parse_env::<f64>("WAGERHUB_CRASH_MAX_BET")? {
            config.crash.max_bet = max_bet;
        }
        if let Some(max_reward) = parse_env::<f64>("WAGERHUB_CRASH_MAX_REWARD")? {
            config.crash.max_reward = max_reward;
        }
        if let Some(tick) = parse_env::<u64>("WAGERHUB_CRASH_TICK_MS")? {
            config.crash.tick_interval_ms = tick;
        }
        if let Some(fee) = parse_env::<u32>("WAGERHUB_LOTTERY_FEE_RATE")? {
            config.wingo.fee_rate = fee;
            config.nine.fee_rate = fee;
            config.multi_wingo.fee_rate = fee;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self, config: &WagerConfig) -> WagerResult<()> {
        validate_crash(&config.crash)?;
        for (name, section) in [("dice", &config.dice), ("limbo", &config.limbo), ("mine", &config.mine)] {
            validate_session(name, section)?;
        }
        for (name, section) in [
            ("wingo", &config.wingo),
            ("nine", &config.nine),
            ("multi_wingo", &config.multi_wingo),
        ] {
            validate_lottery(name, section)?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &WagerConfig, path: &str) -> WagerResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> WagerResult<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, &raw, "could not parse value")),
        Err(_) => Ok(None),
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> crate::errors::WagerError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn validate_bounds(section: &str, rake: u32, min_bet: f64, max_bet: f64, max_reward: f64) -> WagerResult<()> {
    if rake >= 1000 {
        return Err(invalid(&format!("{}.rake", section), &rake.to_string(), "rake is per mille and must be below 1000"));
    }
    if !(min_bet > 0.0 && min_bet <= max_bet) {
        return Err(invalid(
            &format!("{}.min_bet", section),
            &min_bet.to_string(),
            "min_bet must be positive and not above max_bet",
        ));
    }
    if max_reward <= 0.0 {
        return Err(invalid(&format!("{}.max_reward", section), &max_reward.to_string(), "must be positive"));
    }
    Ok(())
}

fn validate_crash(crash: &CrashSettings) -> WagerResult<()> {
    validate_bounds("crash", crash.rake, crash.min_bet, crash.max_bet, crash.max_reward)?;
    if crash.tick_interval_ms == 0 {
        return Err(invalid("crash.tick_interval_ms", "0", "tick cannot be zero"));
    }
    if crash.flight_time_scale <= 0.0 {
        return Err(invalid(
            "crash.flight_time_scale",
            &crash.flight_time_scale.to_string(),
            "scale must be positive",
        ));
    }
    Ok(())
}

fn validate_session(name: &str, section: &SessionSettings) -> WagerResult<()> {
    validate_bounds(name, section.rake, section.min_bet, section.max_bet, section.max_reward)
}

fn validate_lottery(name: &str, section: &LotterySettings) -> WagerResult<()> {
    if section.bet_types.is_empty() {
        return Err(invalid(&format!("{}.bet_types", name), "[]", "at least one room is required"));
    }
    if section.fee_rate >= 1000 {
        return Err(invalid(&format!("{}.fee_rate", name), &section.fee_rate.to_string(), "fee is per mille"));
    }
    if section.betting_interval_ms == 0 {
        return Err(invalid(&format!("{}.betting_interval_ms", name), "0", "interval cannot be zero"));
    }
    if section.stop_betting_interval_ms <= section.settle_interval_ms {
        return Err(invalid(
            &format!("{}.stop_betting_interval_ms", name),
            &section.stop_betting_interval_ms.to_string(),
            "must exceed settle_interval_ms",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let loader = ConfigLoader::new();
        assert!(loader.validate(&WagerConfig::default()).is_ok());
        assert!(loader.validate(&WagerConfig::fast()).is_ok());
    }

    #[test]
    fn test_config_validation() {
        let loader = ConfigLoader::new();
        let mut config = WagerConfig::default();

        config.crash.min_bet = 50_000.0;
        assert!(loader.validate(&config).is_err());

        let mut config = WagerConfig::default();
        config.nine.settle_interval_ms = config.nine.stop_betting_interval_ms;
        assert!(loader.validate(&config).is_err());

        let mut config = WagerConfig::default();
        config.mine.rake = 1000;
        assert!(loader.validate(&config).is_err());
    }

    #[test]
    fn test_save_and_load_config() -> WagerResult<()> {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut original = WagerConfig::default();
        original.crash.rake = 7;
        original.wingo.bet_types = vec![2, 4];

        ConfigLoader::new().save(&original, path)?;
        let loaded = ConfigLoader::new().with_path(path).load()?;

        assert_eq!(loaded.crash.rake, 7);
        assert_eq!(loaded.wingo.bet_types, vec![2, 4]);
        assert_eq!(loaded.dice, original.dice);

        Ok(())
    }
}
