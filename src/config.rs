use std::path::PathBuf;

use anyhow::{Context, Result};

const DEFAULT_SEED_ROOMS: &str = "General,Random";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub seed_rooms: Vec<String>,
    pub static_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match lookup("PORT") {
            Some(port) => port
                .parse()
                .with_context(|| format!("PORT must be a valid port number, got {port:?}"))?,
            None => 8080,
        };

        let seed_rooms = lookup("SEED_ROOMS")
            .unwrap_or_else(|| DEFAULT_SEED_ROOMS.to_owned())
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect();

        Ok(Config {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port,
            seed_rooms,
            static_dir: lookup("STATIC_DIR")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
        })
    }
}
