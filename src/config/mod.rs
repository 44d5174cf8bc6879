mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{BrokerSettings, HandlerErrorPolicy, LoggingSettings, Settings};

/// Prefix of the environment variables read by `load_config`, e.g.
/// `MEMBROKER__BROKER__RETRY_MAX_COUNT=5`.
pub const ENV_PREFIX: &str = "MEMBROKER";

const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Loads the configuration from `config/default.*`, `.env` and environment
/// variables, merged over the default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

/// Same as `load_config` but reads the optional file at `path` (extension
/// may be omitted).
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    // a missing .env is fine
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_with_defaults())
}

#[cfg(test)]
mod tests;
