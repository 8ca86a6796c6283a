//! Server configuration.
//!
//! Settings come from a TOML file: either the path given on the command line
//! or `config.toml` in the platform config directory. A missing default file
//! is not an error; a broken one falls back to defaults and reports warnings.

use directories::ProjectDirs;
use gridsync_core::document::{DEFAULT_MAX_COLS, DEFAULT_MAX_ROWS, DEFAULT_RECOMPUTE_LIMIT};
use gridsync_core::presence::DEFAULT_PALETTE;
use gridsync_core::Dimensions;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const MAX_CONFIG_FILE_BYTES: u64 = 1_048_576; // 1 MiB

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    pub default_rows: usize,
    pub default_cols: usize,
    /// Ceiling on growth through edits and insertions.
    pub max_rows: usize,
    pub max_cols: usize,
    pub recompute_limit: usize,
    pub palette: Vec<String>,
    pub log_level: String,
    /// Grid created in the local backend at startup.
    pub seed_grid: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: DEFAULT_BIND.to_string(),
            default_rows: 100,
            default_cols: 26,
            max_rows: DEFAULT_MAX_ROWS,
            max_cols: DEFAULT_MAX_COLS,
            recompute_limit: DEFAULT_RECOMPUTE_LIMIT,
            palette: DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
            log_level: "info".to_string(),
            seed_grid: None,
        }
    }
}

impl ServerConfig {
    pub fn default_dimensions(&self) -> Dimensions {
        Dimensions::new(self.default_rows, self.default_cols)
    }

    pub fn limits(&self) -> Dimensions {
        Dimensions::new(self.max_rows, self.max_cols)
    }

    /// Replace out-of-range values with defaults, one warning each.
    fn sanitize(&mut self, warnings: &mut Vec<String>) {
        let defaults = ServerConfig::default();
        if self.default_rows == 0 {
            warnings.push("default_rows must be at least 1; using 100".to_string());
            self.default_rows = defaults.default_rows;
        }
        if self.default_cols == 0 {
            warnings.push("default_cols must be at least 1; using 26".to_string());
            self.default_cols = defaults.default_cols;
        }
        if self.max_rows < self.default_rows {
            warnings.push(format!(
                "max_rows ({}) is below default_rows; using {}",
                self.max_rows, self.default_rows
            ));
            self.max_rows = self.default_rows;
        }
        if self.max_cols < self.default_cols {
            warnings.push(format!(
                "max_cols ({}) is below default_cols; using {}",
                self.max_cols, self.default_cols
            ));
            self.max_cols = self.default_cols;
        }
        if self.recompute_limit == 0 {
            warnings.push(format!(
                "recompute_limit must be at least 1; using {}",
                DEFAULT_RECOMPUTE_LIMIT
            ));
            self.recompute_limit = defaults.recompute_limit;
        }
        self.palette.retain(|color| !color.trim().is_empty());
        if self.palette.is_empty() {
            warnings.push("palette is empty; using the built-in colors".to_string());
            self.palette = defaults.palette;
        }
        if self.log_level.trim().is_empty() {
            self.log_level = defaults.log_level;
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("", "", "gridsync")?;
    let mut path = proj.config_dir().to_path_buf();
    path.push("config.toml");
    Some(path)
}

/// Load configuration. Never fails: problems become warnings and defaults.
pub fn load_config(config_file: Option<&Path>) -> (ServerConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();
    let config_path = config_file.map(Path::to_path_buf).or_else(user_config_path);
    let mut config = ServerConfig::default();

    if let Some(path) = config_path.as_ref() {
        if path.exists() {
            match std::fs::metadata(path) {
                Ok(meta) if meta.len() > MAX_CONFIG_FILE_BYTES => {
                    warnings.push(format!(
                        "Refusing to read {}: file too large ({} bytes, max {})",
                        path.display(),
                        meta.len(),
                        MAX_CONFIG_FILE_BYTES
                    ));
                }
                Ok(_) => match std::fs::read_to_string(path) {
                    Ok(content) => match parse_config(&content) {
                        Ok(parsed) => config = parsed,
                        Err(err) => {
                            warnings.push(format!("Failed to parse {}: {}", path.display(), err))
                        }
                    },
                    Err(err) => {
                        warnings.push(format!("Failed to read {}: {}", path.display(), err))
                    }
                },
                Err(err) => warnings.push(format!(
                    "Failed to read metadata for {}: {}",
                    path.display(),
                    err
                )),
            }
        } else if config_file.is_some() {
            warnings.push(format!("Config file not found: {}", path.display()));
        }
    }

    config.sanitize(&mut warnings);
    (config, warnings)
}

pub fn parse_config(content: &str) -> Result<ServerConfig, toml::de::Error> {
    toml::from_str::<ServerConfig>(content)
}
