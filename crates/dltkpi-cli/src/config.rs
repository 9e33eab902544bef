//! Configuration file handling for dltkpi

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default KPI catalog
    pub catalog: Option<PathBuf>,
    /// Default broker address
    pub broker: Option<String>,
    /// Default software branch for threshold lookup
    pub branch: Option<String>,
    /// Default output format
    pub output: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("dltkpi");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(&self, args: CliOverrides<'_>) -> MergedConfig {
        MergedConfig {
            catalog: args
                .catalog
                .map(Path::to_path_buf)
                .or_else(|| self.catalog.clone())
                .unwrap_or_else(|| PathBuf::from("kpis.toml")),
            broker: self.broker.clone(),
            branch: args.branch.map(String::from).or_else(|| self.branch.clone()),
            output: args
                .output
                .map(String::from)
                .or_else(|| self.output.clone())
                .unwrap_or_else(|| "table".to_string()),
            no_color: args.no_color || self.no_color.unwrap_or(false),
        }
    }
}

/// Values given on the command line
#[derive(Debug, Default, Clone, Copy)]
pub struct CliOverrides<'a> {
    pub catalog: Option<&'a Path>,
    pub branch: Option<&'a str>,
    pub output: Option<&'a str>,
    pub no_color: bool,
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub catalog: PathBuf,
    /// Used when a command gets neither --broker nor --replay
    pub broker: Option<String>,
    pub branch: Option<String>,
    pub output: String,
    pub no_color: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_args_override_file_values() {
        let config: Config = toml::from_str(
            r#"
catalog = "/etc/dltkpi/kpis.toml"
broker = "10.0.0.1:3490"
branch = "stable"
"#,
        )
        .unwrap();

        let merged = config.merge_with_args(CliOverrides {
            branch: Some("master"),
            ..Default::default()
        });

        assert_eq!(merged.catalog, PathBuf::from("/etc/dltkpi/kpis.toml"));
        assert_eq!(merged.broker.as_deref(), Some("10.0.0.1:3490"));
        assert_eq!(merged.branch.as_deref(), Some("master"));
        assert!(!merged.no_color);
    }

    #[test]
    fn test_defaults_without_file() {
        let merged = Config::default().merge_with_args(CliOverrides {
            no_color: true,
            ..Default::default()
        });
        assert_eq!(merged.catalog, PathBuf::from("kpis.toml"));
        assert!(merged.broker.is_none());
        assert_eq!(merged.output, "table");
        assert!(merged.no_color);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "output = \"json\"\nno_color = true\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.output.as_deref(), Some("json"));
        assert_eq!(config.no_color, Some(true));
    }
}
