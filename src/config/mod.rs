mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    BrokerBackend, BrokerSettings, HistorySettings, LogSettings, ServerSettings, Settings,
};

/// Loads the configuration from `config/default` and the environment.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Loads the configuration from the given file stem and environment variables
///
/// Sources, lowest priority first: the optional file (any extension the
/// `config` crate understands), `LENS_*` variables using `__` for nesting
/// (`LENS_SERVER__PORT`), then the legacy `PORT` and `PROJECT_ID` variables.
/// Whatever is missing falls back to `Settings::default()`.
pub fn load_config_from(file_stem: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(file_stem).required(false))
        .add_source(
            Environment::with_prefix("LENS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let mut settings = Settings::default().merge(partial);

    if let Ok(port) = std::env::var("PORT") {
        if !port.is_empty() {
            settings.server.port = port
                .parse()
                .map_err(|e| ConfigError::Message(format!("invalid PORT '{port}': {e}")))?;
        }
    }
    if let Ok(project) = std::env::var("PROJECT_ID") {
        if !project.is_empty() {
            settings.broker.project_id = project;
        }
    }

    Ok(settings)
}

#[cfg(test)]
mod tests;
