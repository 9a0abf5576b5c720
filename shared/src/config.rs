use serde::de::DeserializeOwned;
use std::io;
use std::path::{Path, PathBuf};
use std::{env, fs};

pub const CONFIG_FILE: &str = "config.toml";

/// Load the `[section]` table of the nearest `config.toml`.
///
/// The file is searched for in the working directory and then in each of its parents. A missing
/// file or a missing section gives `T::default()`; a file that does not parse is an error.
pub fn load_section<T>(section: &str) -> io::Result<T>
where
    T: DeserializeOwned + Default,
{
    let working_dir = env::current_dir()?;

    let Some(config_file) = find_config_file(&working_dir) else {
        log::debug!("no {CONFIG_FILE} found above {}", working_dir.display());
        return Ok(T::default());
    };

    log::debug!("reading [{section}] from {}", config_file.display());

    let content = fs::read_to_string(&config_file)?;
    parse_section(&content, section).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: {e}", config_file.display()),
        )
    })
}

pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current_dir = start;

    loop {
        let config_file = current_dir.join(CONFIG_FILE);

        if config_file.is_file() {
            return Some(config_file);
        }

        current_dir = current_dir.parent()?;
    }
}

pub fn parse_section<T>(content: &str, section: &str) -> io::Result<T>
where
    T: DeserializeOwned + Default,
{
    let mut table: toml::Table = toml::from_str(content).map_err(invalid_data)?;

    match table.remove(section) {
        None => Ok(T::default()),
        Some(value) => value.try_into().map_err(invalid_data),
    }
}

fn invalid_data(error: toml::de::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, error)
}
