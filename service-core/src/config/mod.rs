use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        load_layered()
    }
}

/// Deserialize `T` from `.env`, an optional `configuration.*` file and
/// `APP__`-prefixed environment variables, in that order of precedence.
pub fn load_layered<T: DeserializeOwned>() -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let config = Cfg::builder()
        .add_source(File::with_name("configuration").required(false))
        .add_source(config::Environment::with_prefix("APP").separator("__"))
        .build()?;

    Ok(config.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_port_falls_back_to_default() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.port, 8080);
    }
}
