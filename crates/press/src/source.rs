use crate::error::{IoContext, PressError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, trace};
use walkdir::WalkDir;

const YAML_DELIMITER: &str = "---";
const TOML_DELIMITER: &str = "+++";
const TOML_DATETIME_KEY: &str = "$__toml_private_datetime";

/// Free-form metadata bag read from front matter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

impl Meta {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key).filter(|value| !value.is_null())
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|value| value.as_str().map(String::from))
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.raw.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.raw.remove(key)
    }
}

/// A file found under a source or asset directory.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEntry {
    pub file: PathBuf,
    pub source_dir: PathBuf,
    /// Directory relative to `source_dir`, `""` or `/a/b`.
    pub path: String,
    pub name: String,
    pub modified: SystemTime,
    pub len: u64,
}

impl SourceEntry {
    pub fn new(source_dir: &Path, file: &Path) -> Result<Self> {
        let relative = file
            .strip_prefix(source_dir)
            .map_err(|_| PressError::InvalidPath {
                path: file.to_path_buf(),
            })?;

        let name = relative
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| PressError::InvalidPath {
                path: file.to_path_buf(),
            })?;

        let path = relative
            .parent()
            .map(|parent| {
                parent
                    .iter()
                    .map(|segment| format!("/{}", segment.to_string_lossy()))
                    .collect::<String>()
            })
            .unwrap_or_default();

        let metadata = fs::metadata(file).io_context("reading metadata of", file)?;
        let modified = metadata
            .modified()
            .io_context("reading modification time of", file)?;

        Ok(Self {
            file: file.to_path_buf(),
            source_dir: source_dir.to_path_buf(),
            path,
            name,
            modified,
            len: metadata.len(),
        })
    }

    /// `path/name`, always starting with `/`.
    pub fn relative(&self) -> String {
        format!("{}/{}", self.path, self.name)
    }

    pub fn base_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(index) if index > 0 => &self.name[..index],
            _ => &self.name,
        }
    }

    pub fn extension(&self) -> &str {
        match self.name.rfind('.') {
            Some(index) if index > 0 => &self.name[index + 1..],
            _ => "",
        }
    }
}

/// Parsed content file: entry, front matter and body.
#[derive(Debug, Clone)]
pub struct Source {
    pub entry: SourceEntry,
    pub meta: Meta,
    pub body: String,
}

#[derive(Debug, Clone)]
pub enum Parsed {
    Content(Source),
    /// No front matter: the file is copied verbatim.
    Opaque(SourceEntry),
}

pub trait SourceParser: Send + Sync {
    fn parse(&self, entry: SourceEntry) -> Result<Parsed>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FrontMatterParser;

impl SourceParser for FrontMatterParser {
    fn parse(&self, entry: SourceEntry) -> Result<Parsed> {
        let bytes = fs::read(&entry.file).io_context("reading source", &entry.file)?;
        let Ok(text) = String::from_utf8(bytes) else {
            return Ok(Parsed::Opaque(entry));
        };

        match split_front_matter(&text, &entry.file)? {
            Some((meta, body)) => Ok(Parsed::Content(Source { entry, meta, body })),
            None => {
                debug!(path = %entry.file.display(), "no front matter, treating as static file");
                Ok(Parsed::Opaque(entry))
            }
        }
    }
}

/// Splits `text` into front matter and body. `None` when the first line is not a
/// delimiter or the closing delimiter is missing.
pub fn split_front_matter(text: &str, path: &Path) -> Result<Option<(Meta, String)>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.split_inclusive('\n');

    let Some(first) = lines.next() else {
        return Ok(None);
    };
    let delimiter = match first.trim_end() {
        YAML_DELIMITER => YAML_DELIMITER,
        TOML_DELIMITER => TOML_DELIMITER,
        _ => return Ok(None),
    };

    let mut front = String::new();
    let mut closed = false;
    let mut consumed = first.len();

    for line in lines {
        consumed += line.len();
        if line.trim_end() == delimiter {
            closed = true;
            break;
        }
        front.push_str(line);
    }

    if !closed {
        return Ok(None);
    }

    let body = text[consumed..].replace("\r\n", "\n");
    let meta = parse_front_matter(&front, delimiter, path)?;
    Ok(Some((meta, body)))
}

fn parse_front_matter(front: &str, delimiter: &str, path: &Path) -> Result<Meta> {
    if front.trim().is_empty() {
        return Ok(Meta::default());
    }

    let value: Value = if delimiter == TOML_DELIMITER {
        toml::from_str(front).map_err(|error| PressError::TomlParse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?
    } else {
        serde_yml::from_str(front).map_err(|error| PressError::YamlParse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?
    };

    match value {
        Value::Object(raw) => Ok(Meta { raw }),
        Value::Null => Ok(Meta::default()),
        _ => Err(PressError::YamlParse {
            path: path.to_path_buf(),
            message: "front matter must be a mapping".to_string(),
        }),
    }
}

/// Name-based file filter shared by the read stage and the observer.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl FileFilter {
    pub fn new(includes: Vec<String>, excludes: Vec<String>) -> Self {
        Self { includes, excludes }
    }

    pub fn accepts(&self, name: &str) -> bool {
        if self.includes.iter().any(|include| include == name) {
            return true;
        }
        if self.excludes.iter().any(|exclude| exclude == name) {
            return false;
        }
        !(name.is_empty()
            || name.starts_with(['.', '_', '#'])
            || name.ends_with('~'))
    }
}

/// Walks `dir` and returns every accepted file, sorted by path.
pub fn scan(dir: &Path, filter: &FileFilter) -> Result<Vec<SourceEntry>> {
    let mut entries = Vec::new();
    if !dir.is_dir() {
        return Ok(entries);
    }

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| filter.accepts(&entry.file_name().to_string_lossy()))
    {
        let entry = entry.map_err(|error| PressError::WalkDir {
            path: dir.to_path_buf(),
            message: error.to_string(),
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        trace!(path = %entry.path().display(), "found source entry");
        entries.push(SourceEntry::new(dir, entry.path())?);
    }

    Ok(entries)
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM[:SS]`, RFC 3339 and TOML datetimes.
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    let text = match value {
        Value::String(text) => text.as_str(),
        Value::Object(map) => map.get(TOML_DATETIME_KEY)?.as_str()?,
        _ => return None,
    };
    parse_date_str(text)
}

pub fn parse_date_str(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|date| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
}

/// Splits a `YYYY-MM-DD-name` file base name into its date and the remaining name.
pub fn date_from_file_name(base_name: &str) -> Option<(DateTime<Utc>, String)> {
    if base_name.len() < 11 || !base_name.is_char_boundary(10) {
        return None;
    }

    let (date_part, rest) = base_name.split_at(10);
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    let name = rest.strip_prefix('-')?;
    if name.is_empty() {
        return None;
    }

    Some((
        Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)),
        name.to_string(),
    ))
}
