mod settings;

use config::{Config, Environment, File};

use crate::utils::error::HubError;

pub use settings::{
    BacklogSettings, DEFAULT_JWT_KEY, HubSettings, JwtSettings, KeySettings, LogSettings,
    PartialSettings, ServerSettings, Settings,
};

/// Loads the configuration from `config/default` and environment variables.
pub fn load_config() -> Result<Settings, HubError> {
    load_config_from("config/default")
}

/// Loads the configuration from the optional file `path` (any extension the
/// `config` crate understands) and `MERCURE__SECTION__KEY` environment
/// variables, merges it over the defaults and validates the result.
pub fn load_config_from(path: &str) -> Result<Settings, HubError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("MERCURE")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("hub.cors_origins"),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = partial.merge(Settings::default());
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests;
