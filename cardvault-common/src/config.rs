//! Configuration file location and root folder resolution

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Directory name used under the platform config/data directories
pub const APP_DIR: &str = "cardvault";

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. `root_folder` key in the TOML config file
/// 4. OS-dependent compiled default
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config_file: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    let config_path = config_file.map(Path::to_path_buf).or_else(default_config_file);
    if let Some(config_path) = config_path {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return PathBuf::from(root_folder);
                }
            }
        }
    }

    default_root_folder()
}

/// First existing config file among the user and system locations
pub fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(APP_DIR).join("config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/cardvault"))
    } else {
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("./cardvault_data"))
    }
}

/// Read and deserialize a TOML config file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    toml::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Load a TOML config, or defaults when no file is available
///
/// An explicitly named file that is missing is an error; the implicit
/// locations are optional.
pub fn load_toml_or_default<T: DeserializeOwned + Default>(explicit: Option<&Path>) -> Result<T> {
    match explicit {
        Some(path) => load_toml(path),
        None => match default_config_file() {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration file");
                load_toml(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(T::default())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;

    #[derive(Debug, Default, Deserialize)]
    struct Sample {
        #[serde(default)]
        name: String,
    }

    #[test]
    #[serial]
    fn test_cli_arg_wins() {
        std::env::set_var("CARDVAULT_TEST_ROOT", "/from/env");
        let resolved = resolve_root_folder(
            Some(Path::new("/from/cli")),
            "CARDVAULT_TEST_ROOT",
            None,
        );
        std::env::remove_var("CARDVAULT_TEST_ROOT");
        assert_eq!(resolved, PathBuf::from("/from/cli"));
    }

    #[test]
    #[serial]
    fn test_env_beats_toml() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "root_folder = \"/from/toml\"\n").unwrap();

        std::env::set_var("CARDVAULT_TEST_ROOT", "/from/env");
        let resolved = resolve_root_folder(None, "CARDVAULT_TEST_ROOT", Some(&file));
        std::env::remove_var("CARDVAULT_TEST_ROOT");
        assert_eq!(resolved, PathBuf::from("/from/env"));
    }

    #[test]
    #[serial]
    fn test_toml_root_folder() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "root_folder = \"/from/toml\"\n").unwrap();

        std::env::remove_var("CARDVAULT_TEST_ROOT");
        let resolved = resolve_root_folder(None, "CARDVAULT_TEST_ROOT", Some(&file));
        assert_eq!(resolved, PathBuf::from("/from/toml"));
    }

    #[test]
    fn test_load_toml_reports_missing_file() {
        let err = load_toml::<Sample>(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_toml_parses_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "name = \"vault\"\n").unwrap();

        let sample: Sample = load_toml(&file).unwrap();
        assert_eq!(sample.name, "vault");
    }
}
