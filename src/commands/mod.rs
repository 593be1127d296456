pub mod evidence;
pub mod report;
pub mod run;
pub mod validate;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Load the explicit config file, or discover `proofgate.toml` in the
/// current directory
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::discover(Path::new(".")),
    }
}

/// Store directory: the command-line override wins over the config
pub fn resolve_store_dir(config: &Config, store_dir: Option<PathBuf>) -> PathBuf {
    store_dir.unwrap_or_else(|| config.store.dir.clone())
}
