//! Module for searching for splitpad config files

use std::path::PathBuf;

/// Base system fallback path to use if one cannot be found with XDG
const FALLBACK_BASE_PATH: &str = "/usr/share/splitpad";

/// File names looked up in each config directory
pub const CONFIG_FILE: &str = "config.yaml";
pub const LAYOUT_FILE: &str = "layout.yaml";
pub const KEYMAP_FILE: &str = "keymap.yaml";

/// Returns the base path for shared data
pub fn get_base_path() -> PathBuf {
    let Ok(base_dirs) = xdg::BaseDirectories::with_prefix("splitpad") else {
        log::warn!("Unable to determine config base path. Using fallback path.");
        return PathBuf::from(FALLBACK_BASE_PATH);
    };

    // Get the data directories in preference order
    let data_dirs = base_dirs.get_data_dirs();
    for dir in data_dirs {
        if dir.exists() {
            return dir;
        }
    }

    log::warn!("Config base path not found. Using fallback path.");
    PathBuf::from(FALLBACK_BASE_PATH)
}

/// Returns a list of directories in load order to find configuration files.
/// E.g. ["~/.config/splitpad", "/etc/splitpad", "/usr/share/splitpad"]
pub fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(base_dirs) = xdg::BaseDirectories::with_prefix("splitpad") {
        paths.push(base_dirs.get_config_home());
    }
    paths.push(PathBuf::from("/etc/splitpad"));
    paths.push(get_base_path());

    paths
}

/// Returns the first existing file with the given name in the config paths
pub fn find_config_file(name: &str) -> Option<PathBuf> {
    find_in(&get_config_paths(), name)
}

/// Returns the first existing file with the given name in the given directories
pub fn find_in(paths: &[PathBuf], name: &str) -> Option<PathBuf> {
    paths
        .iter()
        .map(|dir| dir.join(name))
        .inspect(|path| log::trace!("Checking for config at {path:?}"))
        .find(|path| path.is_file())
}
