use std::path::Path;
use std::{fs, io};

use color_eyre::eyre::WrapErr;
use serde::de::DeserializeOwned;

pub mod permissions;

/// Read and parse `path` as TOML, or return `None` if it does not exist.
///
/// NOTE: uses blocking I/O internally.
fn read_toml_optional<T: DeserializeOwned>(name: &str, path: &Path) -> crate::Result<Option<T>> {
    let config_toml = match fs::read_to_string(path) {
        Ok(config_toml) => config_toml,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).wrap_err_with(|| format!("error reading from {}", path.display()))
        }
    };

    toml::from_str(&config_toml)
        .map(Some)
        .wrap_err_with(|| format!("error parsing {name} from {}", path.display()))
}
