use crate::error::{IoContext, PressError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CONFIG_ENV: &str = "PRESS_CONFIG";
const CONFIG_EXTENSIONS: [&str; 4] = ["yml", "yaml", "json", "toml"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStrategy {
    #[default]
    Merge,
    Recursive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub title: String,
    pub root: String,
    pub theme: String,
    pub source_dirs: Vec<String>,
    pub asset_dirs: Vec<String>,
    pub dest_dir: String,
    pub work_dir: String,
    pub templates_dir: String,
    pub show_drafts: bool,
    pub paginate: Option<usize>,
    pub permalink: Option<String>,
    pub threads: Option<usize>,
    pub render_strategy: RenderStrategy,
    pub require_render_content: bool,
    pub excerpt_separator: String,
    pub related_posts: usize,
    pub related_posts_finder: String,
    pub related_posts_categories_factor: f64,
    pub related_posts_tags_factor: f64,
    pub highlighter: String,
    pub converters: Vec<String>,
    pub generators: Vec<String>,
    pub processors: Vec<String>,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub url_encode: bool,
    pub url_decode: bool,
    pub new_post: String,
    pub new_page: String,
    pub date_format: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "press".to_string(),
            root: String::new(),
            theme: "default".to_string(),
            source_dirs: vec!["pages".to_string(), "posts".to_string()],
            asset_dirs: vec!["assets".to_string()],
            dest_dir: "target/public".to_string(),
            work_dir: "target/work".to_string(),
            templates_dir: "templates".to_string(),
            show_drafts: false,
            paginate: None,
            permalink: None,
            threads: None,
            render_strategy: RenderStrategy::Merge,
            require_render_content: false,
            excerpt_separator: "<!--more-->".to_string(),
            related_posts: 5,
            related_posts_finder: "cosine".to_string(),
            related_posts_categories_factor: 1.0,
            related_posts_tags_factor: 1.0,
            highlighter: "syntect".to_string(),
            converters: vec!["markdown".to_string(), "identity".to_string()],
            generators: vec!["pagination".to_string(), "meta_tag_pages".to_string()],
            processors: vec!["collections".to_string(), "related_posts".to_string()],
            includes: Vec::new(),
            excludes: Vec::new(),
            url_encode: false,
            url_decode: false,
            new_post: "posts/${year}-${month}-${day}-${name}.${format}".to_string(),
            new_page: "pages/${name}.${format}".to_string(),
            date_format: "%Y-%m-%d".to_string(),
        }
    }
}

/// Built-in defaults: every `SiteConfig` field plus the `post` and `page` collections.
pub fn default_values() -> Map<String, Value> {
    let mut values = match serde_json::to_value(SiteConfig::default()) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    values.insert(
        "collections".to_string(),
        json!({
            "post": {
                "tags": {
                    "tag": { "alias": ["tags"], "output_dir": "/tag" }
                },
                "categories": {
                    "category": { "alias": ["categories"], "output_dir": "/category" }
                }
            },
            "page": {}
        }),
    );
    values
}

/// Hierarchical key-value configuration. Lookups try the site values (overrides, then config
/// files), then the theme fallback, then the built-in defaults.
#[derive(Debug, Clone)]
pub struct Config {
    base_dir: PathBuf,
    defaults: Map<String, Value>,
    values: Map<String, Value>,
    fallback: Map<String, Value>,
    files: Vec<PathBuf>,
}

fn non_null(value: Option<&Value>) -> Option<&Value> {
    value.filter(|value| !value.is_null())
}

impl Config {
    pub fn load(base_dir: impl AsRef<Path>, overrides: Map<String, Value>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let files = resolve_config_files(&base_dir, &overrides)?;

        let mut values = overrides;
        for file in &files {
            info!(path = %file.display(), "loading config");
            values.extend(load_config_file(file)?);
        }

        Ok(Self {
            base_dir,
            defaults: default_values(),
            values,
            fallback: Map::new(),
            files,
        })
    }

    /// Defaults plus `values`, without touching the file system.
    pub fn from_values(base_dir: impl AsRef<Path>, values: Map<String, Value>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            defaults: default_values(),
            values,
            fallback: Map::new(),
            files: Vec::new(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Every layer merged into one map.
    pub fn values(&self) -> Map<String, Value> {
        let mut merged = self.defaults.clone();
        for layer in [&self.fallback, &self.values] {
            merged.extend(
                layer
                    .iter()
                    .filter(|(_, value)| !value.is_null())
                    .map(|(key, value)| (key.clone(), value.clone())),
            );
        }
        merged
    }

    /// Theme values, consulted after the site's own values.
    pub fn set_fallback(&mut self, fallback: Map<String, Value>) {
        self.fallback = fallback;
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        non_null(self.values.get(key))
            .or_else(|| non_null(self.fallback.get(key)))
            .or_else(|| non_null(self.defaults.get(key)))
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_as(key).unwrap_or(default)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn site(&self) -> Result<SiteConfig> {
        serde_json::from_value(Value::Object(self.values())).map_err(|error| {
            PressError::InvalidConfig {
                key: "site".to_string(),
                message: error.to_string(),
            }
        })
    }
}

fn resolve_config_files(base_dir: &Path, overrides: &Map<String, Value>) -> Result<Vec<PathBuf>> {
    let named = std::env::var(CONFIG_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| {
            overrides
                .get("config")
                .and_then(Value::as_str)
                .map(String::from)
        });

    if let Some(named) = named {
        info!(files = %named, "using named config files");
        return Ok(named
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| base_dir.join(name))
            .collect());
    }

    let mut files = Vec::new();
    if !base_dir.is_dir() {
        return Ok(files);
    }

    for entry in fs::read_dir(base_dir).io_context("listing config files in", base_dir)? {
        let entry = entry.io_context("listing config files in", base_dir)?;
        let path = entry.path();
        if path.is_file() && is_config_file_name(&entry.file_name().to_string_lossy()) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

pub fn is_config_file_name(name: &str) -> bool {
    name.starts_with("config")
        && Path::new(name)
            .extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| CONFIG_EXTENSIONS.contains(&extension))
            .unwrap_or(false)
}

/// Reads a YAML, JSON or TOML file into a key-value map chosen by extension.
pub fn load_config_file(path: &Path) -> Result<Map<String, Value>> {
    let content = fs::read_to_string(path).io_context("reading config", path)?;
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .unwrap_or("");

    let value: Value = match extension {
        "json" => serde_json::from_str(&content).map_err(|error| PressError::JsonParse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?,
        "toml" => toml::from_str(&content).map_err(|error| PressError::TomlParse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?,
        _ => {
            if content.trim().is_empty() {
                Value::Null
            } else {
                serde_yml::from_str(&content).map_err(|error| PressError::YamlParse {
                    path: path.to_path_buf(),
                    message: error.to_string(),
                })?
            }
        }
    };

    match value {
        Value::Object(map) => {
            debug!(path = %path.display(), keys = map.len(), "config loaded");
            Ok(map)
        }
        Value::Null => Ok(Map::new()),
        _ => Err(PressError::InvalidConfig {
            key: path.display().to_string(),
            message: "top level must be a mapping".to_string(),
        }),
    }
}
