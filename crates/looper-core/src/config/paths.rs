//! Standard locations of looper configuration files

use std::path::PathBuf;

/// Directory holding looper configuration
///
/// Returns: `{config_dir}/looper`, e.g. `~/.config/looper` on Linux
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("looper")
}

/// Path of the engine configuration file
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("engine.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_in_looper_dir() {
        let path = default_config_path();
        assert!(path.ends_with("looper/engine.yaml"));
    }
}
