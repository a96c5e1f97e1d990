//! The four configuration knobs of spec.md §6, loadable from a
//! `kiln.toml` file and overridable by CLI flags — the same precedence
//! cargo itself applies between `.cargo/config.toml` and its flags.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_forks: usize,
    pub prefork_allocation_reserve_ratio: f64,
    pub breadcrumbs_to: Option<PathBuf>,
    pub using_breadcrumbs_from: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_forks: 16,
            prefork_allocation_reserve_ratio: 0.80,
            breadcrumbs_to: None,
            using_breadcrumbs_from: None,
        }
    }
}

impl Config {
    /// Loads `kiln.toml` from `path` if it exists; otherwise returns
    /// the defaults. A present-but-invalid file is an error.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        Ok(config)
    }

    /// CLI flags win over the config file, matching cargo's own
    /// precedence between config and explicit flags.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = overrides.max_forks {
            self.max_forks = v;
        }
        if let Some(v) = overrides.prefork_allocation_reserve_ratio {
            self.prefork_allocation_reserve_ratio = v;
        }
        if let Some(v) = &overrides.breadcrumbs_to {
            self.breadcrumbs_to = Some(v.clone());
        }
        if let Some(v) = &overrides.using_breadcrumbs_from {
            self.using_breadcrumbs_from = Some(v.clone());
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub max_forks: Option<usize>,
    pub prefork_allocation_reserve_ratio: Option<f64>,
    pub breadcrumbs_to: Option<PathBuf>,
    pub using_breadcrumbs_from: Option<PathBuf>,
}
