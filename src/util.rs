use std::path::PathBuf;

const MONITOR_PROFILE: &str = "MONITOR_PROFILE";

const DEFAULT_PROFILE: &str = "production";

/// Profile to run, from `MONITOR_PROFILE`
pub fn get_profile() -> String {
    profile_or_default(std::env::var(MONITOR_PROFILE).ok())
}

/// `value` unless it is unset or empty, `production` otherwise
pub fn profile_or_default(value: Option<String>) -> String {
    value
        .filter(|profile| !profile.is_empty())
        .unwrap_or_else(|| DEFAULT_PROFILE.to_string())
}

const MONITOR_CONFIG: &str = "MONITOR_CONFIG";

const DEFAULT_CONFIG: &str = "config.json";

/// Configuration file path, from `MONITOR_CONFIG`
pub fn get_config_path() -> PathBuf {
    config_path_or_default(std::env::var(MONITOR_CONFIG).ok())
}

/// `value` unless it is unset or empty, `config.json` otherwise
pub fn config_path_or_default(value: Option<String>) -> PathBuf {
    value
        .filter(|path| !path.is_empty())
        .map_or(PathBuf::from(DEFAULT_CONFIG), PathBuf::from)
}
