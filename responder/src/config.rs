use serde::Deserialize;

use crate::error::{Error, Result};

/// Settings of the `[responder]` table in `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Executor threads. Connections are spread over them round-robin.
    pub workers: usize,
    /// Connections served at the same time. Further connections are shut down right away.
    pub max_connections: usize,
    pub keep_alive: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: String::from("localhost"),
            port: 8000,
            workers: 4,
            max_connections: 1024,
            keep_alive: true,
        }
    }
}

impl Config {
    pub fn load() -> Result<Config> {
        let config: Config = shared::config::load_section("responder")?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config(String::from("host must not be empty")));
        }

        if self.workers == 0 {
            return Err(Error::Config(String::from("workers must be at least 1")));
        }

        if self.max_connections == 0 {
            return Err(Error::Config(String::from(
                "max_connections must be at least 1",
            )));
        }

        Ok(())
    }
}
