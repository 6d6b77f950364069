use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PressError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {action} {path}: {source}")]
    IoAt {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error in {path}: {message}")]
    TomlParse { path: PathBuf, message: String },

    #[error("YAML parse error in {path}: {message}")]
    YamlParse { path: PathBuf, message: String },

    #[error("JSON parse error in {path}: {message}")]
    JsonParse { path: PathBuf, message: String },

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Missing required field '{field}' in file: {path}")]
    MissingField { field: String, path: PathBuf },

    #[error("Invalid date '{value}' in file: {path}")]
    InvalidDate { value: String, path: PathBuf },

    #[error("Invalid permalink template '{template}': {message}")]
    InvalidPermalink { template: String, message: String },

    #[error("Parent category not found: {path}")]
    UnknownParentCategory { path: String },

    #[error("No converter found for source: {path}")]
    NoConverter { path: PathBuf },

    #[error("No page size specified for paginated page: {url}")]
    MissingPageSize { url: String },

    #[error("Unknown {kind} '{name}'")]
    UnknownExtension { kind: &'static str, name: String },

    #[error("Invalid configuration for '{key}': {message}")]
    InvalidConfig { key: String, message: String },

    #[error("Theme not found: {name}")]
    ThemeNotFound { name: String },

    #[error("Invalid path: {path}")]
    InvalidPath { path: PathBuf },

    #[error("Directory walk error in {path}: {message}")]
    WalkDir { path: PathBuf, message: String },

    #[error("'{name}' does not produce a usable slug")]
    EmptySlug { name: String },

    #[error("File already exists: {path}")]
    AlreadyExists { path: PathBuf },

    #[error("Configuration changed, the site must be reinitialized")]
    ConfigChanged,

    #[error("Stage '{stage}' failed after {elapsed:.2?}: {source}")]
    Stage {
        stage: &'static str,
        elapsed: Duration,
        #[source]
        source: Box<PressError>,
    },
}

impl PressError {
    pub fn is_config_changed(&self) -> bool {
        match self {
            PressError::ConfigChanged => true,
            PressError::Stage { source, .. } => source.is_config_changed(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PressError>;

pub trait IoContext<T> {
    fn io_context(self, action: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context(self, action: &'static str, path: &Path) -> Result<T> {
        self.map_err(|source| PressError::IoAt {
            action,
            path: path.to_path_buf(),
            source,
        })
    }
}
