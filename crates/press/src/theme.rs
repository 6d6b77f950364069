use crate::config::{Config, SiteConfig, load_config_file};
use crate::error::{PressError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

const THEME_CONFIG_NAMES: [&str; 4] = ["theme.yml", "theme.yaml", "theme.json", "theme.toml"];

/// A theme directory: templates plus optional sources, assets and a config file.
#[derive(Debug, Clone)]
pub struct Theme {
    pub name: String,
    pub path: PathBuf,
    pub templates: PathBuf,
    pub source: Option<PathBuf>,
    pub assets: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub values: Map<String, Value>,
}

impl Theme {
    pub fn resolve(config: &Config, site: &SiteConfig) -> Result<Self> {
        let base_dir = config.base_dir();
        let theme_path = base_dir.join("themes").join(&site.theme);

        if theme_path.is_dir() {
            Self::from_directory(&site.theme, &theme_path)
        } else if site.theme == "default" {
            Ok(Self::site_local(base_dir, site))
        } else {
            Err(PressError::ThemeNotFound {
                name: site.theme.clone(),
            })
        }
    }

    fn site_local(base_dir: &Path, site: &SiteConfig) -> Self {
        Self {
            name: "default".to_string(),
            path: base_dir.to_path_buf(),
            templates: base_dir.join(&site.templates_dir),
            source: None,
            assets: None,
            config_file: None,
            values: Map::new(),
        }
    }

    fn from_directory(name: &str, theme_dir: &Path) -> Result<Self> {
        let config_file = THEME_CONFIG_NAMES
            .iter()
            .map(|file_name| theme_dir.join(file_name))
            .find(|path| path.is_file());

        let values = match &config_file {
            Some(path) => load_config_file(path)?,
            None => Map::new(),
        };

        let templates = values
            .get("templates_dir")
            .and_then(Value::as_str)
            .map(|dir| theme_dir.join(dir))
            .unwrap_or_else(|| theme_dir.join("templates"));

        let existing = |dir: PathBuf| if dir.is_dir() { Some(dir) } else { None };

        debug!(theme = name, path = %theme_dir.display(), "theme resolved");

        Ok(Self {
            name: name.to_string(),
            path: theme_dir.to_path_buf(),
            templates,
            source: existing(theme_dir.join("source")),
            assets: existing(theme_dir.join("assets")),
            config_file,
            values,
        })
    }
}
