//! Configuration and data directory discovery

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::usage::models::AppConfig;
use crate::usage::pricing::CacheTier;

/// Environment variable listing Claude data directories
pub const CLAUDE_CONFIG_DIR_ENV: &str = "CLAUDE_CONFIG_DIR";
/// Environment variable overriding the default cache write tier
pub const CACHE_TIER_ENV: &str = "CLAUDE_USAGE_BLOCKS_CACHE_TIER";

const LOCAL_CONFIG_FILE: &str = ".claude-usage-blocks.json";

#[cfg(windows)]
const DIR_LIST_SEPARATORS: &[char] = &[',', ';'];
#[cfg(not(windows))]
const DIR_LIST_SEPARATORS: &[char] = &[','];

/// Error type for config loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Resolve the Claude data directories.
/// Priority: 1. Custom path, 2. CLAUDE_CONFIG_DIR (comma list), 3. ~/.claude and ~/.config/claude
pub fn resolve_data_dirs(
    custom_path: Option<&str>,
    env_value: Option<&str>,
    home: Option<&Path>,
) -> Vec<PathBuf> {
    // 1. Custom path takes highest priority
    if let Some(path) = custom_path.filter(|p| !p.trim().is_empty()) {
        return vec![PathBuf::from(path)];
    }

    // 2. Environment list
    if let Some(value) = env_value {
        let dirs: Vec<PathBuf> = value
            .split(DIR_LIST_SEPARATORS)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        if !dirs.is_empty() {
            return dirs;
        }
    }

    // 3. Defaults that exist; fall back to ~/.claude so the miss gets reported
    let Some(home) = home else {
        return vec![PathBuf::from(".claude")];
    };
    let candidates = [home.join(".claude"), home.join(".config").join("claude")];
    let existing: Vec<PathBuf> = candidates.iter().filter(|p| p.is_dir()).cloned().collect();
    if existing.is_empty() {
        vec![candidates[0].clone()]
    } else {
        existing
    }
}

/// Data directories for this process, from the environment and home directory
pub fn get_claude_data_dirs(custom_path: Option<&str>) -> Vec<PathBuf> {
    let env_value = env::var(CLAUDE_CONFIG_DIR_ENV).ok();
    let home = dirs::home_dir();
    let dirs = resolve_data_dirs(custom_path, env_value.as_deref(), home.as_deref());
    debug!("Using data directories: {:?}", dirs);
    dirs
}

/// Decode an encoded project directory name (Claude Code custom encoding).
///
/// Unix paths are encoded with every `/` turned into `-`, so a leading `-`
/// marks one. Windows paths encode `:\` as `--` and `\` as `-`.
pub fn decode_project_path(encoded: &str) -> String {
    if encoded.starts_with('-') {
        return encoded.replace('-', "/");
    }

    // First replace `--` with `:\` (drive letter separator on Windows)
    let result = encoded.replace("--", ":\\");
    // Then replace remaining `-` with `\` (path separator)
    result.replace('-', "\\")
}

/// Extract a display-friendly name from a project path
pub fn get_display_name(project_path: &str) -> String {
    // Last component, whichever separator the path uses
    project_path
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty())
        .unwrap_or(project_path)
        .to_string()
}

/// Locations searched for a config file when none is given explicitly
pub fn config_search_paths(home: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(home) = home {
        paths.push(home.join(".claude").join("claude-usage-blocks.json"));
        paths.push(
            home.join(".config")
                .join("claude-usage-blocks")
                .join("config.json"),
        );
    }
    paths
}

pub fn load_config_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the app config.
///
/// An explicit path must load. Otherwise the first default location that
/// loads wins; broken files there are warned about and skipped. Environment
/// overrides are applied last.
pub fn load_config(explicit_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let config = match explicit_path {
        Some(path) => load_config_file(path)?,
        None => load_from_default_locations(&config_search_paths(dirs::home_dir().as_deref())),
    };

    Ok(apply_env_overrides(config, |key| env::var(key).ok()))
}

fn load_from_default_locations(paths: &[PathBuf]) -> AppConfig {
    for path in paths.iter().filter(|p| p.is_file()) {
        match load_config_file(path) {
            Ok(config) => {
                debug!("Loaded config from {:?}", path);
                return config;
            }
            Err(e) => warn!("{}", e),
        }
    }
    AppConfig::default()
}

/// Apply environment overrides; `lookup` reads one variable
pub fn apply_env_overrides<F>(mut config: AppConfig, lookup: F) -> AppConfig
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(CACHE_TIER_ENV) {
        match value.parse::<CacheTier>() {
            Ok(tier) => config.cache_tier = tier,
            Err(e) => warn!("Ignoring {}: {}", CACHE_TIER_ENV, e),
        }
    }
    config
}
