use anyhow::Error;
use serde::Deserialize;

/// Account credentials, read from `config/confab.toml` (if present) with
/// `CONFAB__`-prefixed environment overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub user: String,
    pub host: String,
    pub password: String,
}

impl Settings {
    pub fn init() -> Result<Self, Error> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/confab").required(false))
            .add_source(config::Environment::with_prefix("CONFAB").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
