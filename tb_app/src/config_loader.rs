use std::path::Path;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use tb_throttle::ThrottleConfig;

/// Environment variable prefix for overriding file settings, e.g. `THROTTLE_RATE=5`
pub const ENV_PREFIX: &str = "THROTTLE";

/// Rate used when no config file can be loaded
pub const FALLBACK_RATE: u32 = 10;

#[derive(Debug, Deserialize)]
pub struct ThrottleConfigFile {
    #[serde(flatten)]
    pub throttle: ThrottleConfig,
    pub log_dir: Option<String>,
    pub log_level: Option<String>,
    /// Mirror log lines to stdout, defaults to true
    pub log_stdout: Option<bool>,
    /// Log file rotation: `minutely`, `hourly`, `daily` or `never`
    pub log_rotation: Option<String>,
}

impl Default for ThrottleConfigFile {
    fn default() -> Self {
        Self {
            throttle: ThrottleConfig { rate: Some(FALLBACK_RATE.into()), ..Default::default() },
            log_dir: None,
            log_level: None,
            log_stdout: None,
            log_rotation: None,
        }
    }
}

pub fn load_throttle_config<P: AsRef<Path>>(path: P) -> Result<ThrottleConfigFile, ConfigError> {
    let config = Config::builder().add_source(File::from(path.as_ref())).add_source(Environment::with_prefix(ENV_PREFIX)).build()?;

    config.try_deserialize()
}

/// Load throttle config, falling back to the default and handing back the load error
///
/// Nothing is logged here: the config decides how logging is set up, so the
/// caller reports the error once its subscriber is installed.
pub fn load_throttle_config_or_default<P: AsRef<Path>>(path: P) -> (ThrottleConfigFile, Option<ConfigError>) {
    match load_throttle_config(path) {
        Ok(config) => (config, None),
        Err(err) => (ThrottleConfigFile::default(), Some(err)),
    }
}
