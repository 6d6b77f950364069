use crate::error::{PressError, Result};
use crate::source::{SourceEntry, date_from_file_name};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

const SLUG_REMOVED_CHARS: [char; 9] = ['\\', ':', '*', '?', '"', '<', '>', '|', '/'];

pub trait SlugHelper: Send + Sync {
    fn to_slug(&self, name: &str) -> Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSlugHelper;

impl SlugHelper for DefaultSlugHelper {
    fn to_slug(&self, name: &str) -> Result<String> {
        let cleaned: String = name
            .chars()
            .filter(|character| !SLUG_REMOVED_CHARS.contains(character))
            .collect();
        let slug = cleaned.trim_matches(|character: char| character == '.' || character.is_whitespace());
        if slug.is_empty() {
            return Err(PressError::EmptySlug {
                name: name.to_string(),
            });
        }
        Ok(slug.to_string())
    }
}

/// Expands `${name}` placeholders. Unclosed placeholders and unknown names are errors.
pub fn expand_template(template: &str, params: &Map<String, Value>) -> Result<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| PressError::InvalidPermalink {
            template: template.to_string(),
            message: "unclosed '${'".to_string(),
        })?;

        let key = after[..end].trim();
        let value = params.get(key).ok_or_else(|| PressError::InvalidPermalink {
            template: template.to_string(),
            message: format!("unknown variable '{key}'"),
        })?;
        output.push_str(&value_to_string(value));
        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Variables available to a content permalink template.
pub fn permalink_params(
    entry: &SourceEntry,
    name: &str,
    date: Option<DateTime<Utc>>,
    meta: &Map<String, Value>,
    output_extension: &str,
) -> Map<String, Value> {
    let mut params: Map<String, Value> = meta
        .iter()
        .filter(|(_, value)| !value.is_object() && !value.is_array())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    params.insert("name".to_string(), Value::from(name));
    params.insert("fileName".to_string(), Value::from(entry.name.as_str()));
    params.insert("pathToFile".to_string(), Value::from(entry.path.as_str()));
    params.insert(
        "outputFileExtension".to_string(),
        Value::from(output_extension),
    );

    if let Some(date) = date {
        for (key, format) in [
            ("year", "%Y"),
            ("month", "%m"),
            ("day", "%d"),
            ("hour", "%H"),
            ("minute", "%M"),
            ("second", "%S"),
        ] {
            params.insert(key.to_string(), Value::from(date.format(format).to_string()));
        }
    }

    params
}

pub fn default_page_url(entry: &SourceEntry, output_extension: &str) -> String {
    let base_name = entry.base_name();
    if base_name == "index" && output_extension == ".html" {
        format!("{}/", entry.path)
    } else {
        format!("{}/{}{}", entry.path, base_name, output_extension)
    }
}

/// Post name: the file base name without its `YYYY-MM-DD-` prefix.
pub fn post_name(entry: &SourceEntry) -> String {
    date_from_file_name(entry.base_name())
        .map(|(_, name)| name)
        .unwrap_or_else(|| entry.base_name().to_string())
}

pub fn default_post_url(entry: &SourceEntry) -> String {
    format!("{}/{}/", entry.path, post_name(entry))
}

/// Makes sure a url starts with `/`.
pub fn normalize_url(url: &str) -> String {
    if url.starts_with('/') {
        url.to_string()
    } else {
        format!("/{url}")
    }
}

/// Percent-encodes each path segment, keeping the slashes.
pub fn encode_url(url: &str) -> String {
    url.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn decode_url(url: &str) -> String {
    urlencoding::decode(url)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| url.to_string())
}
