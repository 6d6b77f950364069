use crate::config::{Config, SiteConfig};
use crate::error::{IoContext, PressError, Result};
use crate::links::{
    decode_url, default_page_url, default_post_url, encode_url, expand_template, normalize_url,
    permalink_params, post_name, value_to_string,
};
use crate::pagination::Pager;
use crate::source::{Meta, Source, SourceEntry, date_from_file_name, parse_date};
use crate::taxonomy::{CategoryId, MetaTagRef, TagId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

pub const POST_LAYOUT: &str = "post";
pub const DRAFT_TITLE_PREFIX: &str = "[Draft] ";

/// Index of a content unit in the site arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContentId(pub usize);

/// Ordered lists keyed by taxonomy dimension name. Keys keep insertion order.
#[derive(Debug, Clone)]
pub struct ListHolder<T> {
    entries: Vec<(String, Vec<T>)>,
}

impl<T> Default for ListHolder<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> ListHolder<T> {
    pub fn get(&self, key: &str) -> Option<&[T]> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, list)| list.as_slice())
    }

    pub fn get_or_create(&mut self, key: &str) -> &mut Vec<T> {
        let index = match self.entries.iter().position(|(name, _)| name == key) {
            Some(index) => index,
            None => {
                self.entries.push((key.to_string(), Vec::new()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index].1
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[T])> {
        self.entries
            .iter()
            .map(|(name, list)| (name.as_str(), list.as_slice()))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Vec<T>)> {
        self.entries
            .iter_mut()
            .map(|(name, list)| (name.as_str(), list))
    }

    /// Every value across all dimensions.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().flat_map(|(_, list)| list.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, list)| list.is_empty())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostData {
    pub id: String,
    pub excerpt: String,
    pub excerpt_extracted: bool,
    pub converted_excerpt: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ContentKind {
    Page,
    Post(PostData),
}

/// A page or post and everything the pipeline derives for it.
#[derive(Debug, Clone)]
pub struct Content {
    pub kind: ContentKind,
    pub source: Arc<Source>,
    pub meta: Meta,
    pub body: String,
    pub title: Option<String>,
    pub url: String,
    pub layout: Option<String>,
    pub permalink: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub published: bool,
    pub output_extension: String,
    pub converted: Option<String>,
    pub rendered: Option<String>,
    pub pager: Option<Pager>,
    pub next: Option<ContentId>,
    pub previous: Option<ContentId>,
    pub tags: ListHolder<TagId>,
    pub categories: ListHolder<CategoryId>,
    pub related_posts: Vec<ContentId>,
    pub meta_tag: Option<MetaTagRef>,
    /// Listing or pager page produced by a generator.
    pub generated: bool,
}

impl Content {
    pub fn from_source(
        source: Source,
        output_extension: &str,
        config: &Config,
        site: &SiteConfig,
    ) -> Result<Self> {
        let meta = source.meta.clone();
        let layout = meta.get_string("layout");
        let is_post = layout.as_deref() == Some(POST_LAYOUT);
        let published = meta.get_bool("published").unwrap_or(true);

        let title = meta.get_string("title").map(|title| {
            if published {
                title
            } else {
                format!("{DRAFT_TITLE_PREFIX}{title}")
            }
        });

        let date = match meta.get("date") {
            Some(value) => Some(parse_date(value).ok_or_else(|| PressError::InvalidDate {
                value: value_to_string(value),
                path: source.entry.file.clone(),
            })?),
            None => date_from_file_name(source.entry.base_name()).map(|(date, _)| date),
        };
        if is_post && date.is_none() {
            return Err(PressError::MissingField {
                field: "date".to_string(),
                path: source.entry.file.clone(),
            });
        }

        let updated = meta
            .get("updated")
            .or_else(|| meta.get("date_updated"))
            .and_then(parse_date);

        let permalink = meta
            .get_string("permalink")
            .or_else(|| {
                layout
                    .as_ref()
                    .and_then(|layout| config.get_str(&format!("permalink_{layout}")))
                    .map(String::from)
            })
            .or_else(|| {
                if is_post {
                    site.permalink.clone()
                } else {
                    None
                }
            });

        let name = if is_post {
            post_name(&source.entry)
        } else {
            source.entry.base_name().to_string()
        };

        let url = match (meta.get_string("url"), &permalink) {
            (Some(url), _) => url,
            (None, Some(template)) => {
                let params = permalink_params(&source.entry, &name, date, &meta.raw, output_extension);
                expand_template(template, &params)?
            }
            (None, None) if is_post => default_post_url(&source.entry),
            (None, None) => default_page_url(&source.entry, output_extension),
        };

        let mut url = normalize_url(&url);
        if meta.get_bool("url_decode").unwrap_or(site.url_decode) {
            url = decode_url(&url);
        }
        if meta.get_bool("url_encode").unwrap_or(site.url_encode) {
            url = encode_url(&url);
        }

        let kind = if is_post {
            let (excerpt, excerpt_extracted) =
                extract_excerpt(&meta, &source.body, &site.excerpt_separator);
            ContentKind::Post(PostData {
                id: meta.get_string("id").unwrap_or_else(|| url.clone()),
                excerpt,
                excerpt_extracted,
                converted_excerpt: None,
            })
        } else {
            ContentKind::Page
        };

        trace!(path = %source.entry.file.display(), url = %url, post = is_post, "content created");

        Ok(Self {
            kind,
            body: source.body.clone(),
            source: Arc::new(source),
            meta,
            title,
            url,
            layout,
            permalink,
            date,
            updated,
            published,
            output_extension: output_extension.to_string(),
            converted: None,
            rendered: None,
            pager: None,
            next: None,
            previous: None,
            tags: ListHolder::default(),
            categories: ListHolder::default(),
            related_posts: Vec::new(),
            meta_tag: None,
            generated: false,
        })
    }

    pub fn is_post(&self) -> bool {
        matches!(self.kind, ContentKind::Post(_))
    }

    pub fn post_data(&self) -> Option<&PostData> {
        match &self.kind {
            ContentKind::Post(data) => Some(data),
            ContentKind::Page => None,
        }
    }

    pub fn post_data_mut(&mut self) -> Option<&mut PostData> {
        match &mut self.kind {
            ContentKind::Post(data) => Some(data),
            ContentKind::Page => None,
        }
    }

    pub fn entry(&self) -> &SourceEntry {
        &self.source.entry
    }

    /// Output path for this unit; directory-style urls get an `index` file.
    pub fn output_file(&self, dest: &Path) -> PathBuf {
        let mut url = decode_url(&self.url);
        if url.ends_with('/') {
            url.push_str("index");
            url.push_str(&self.output_extension);
        }
        dest.join(url.trim_start_matches('/'))
    }

    /// Final text for this unit: rendered, else converted, else the raw body.
    pub fn output(&self) -> &str {
        self.rendered
            .as_deref()
            .or(self.converted.as_deref())
            .unwrap_or(&self.body)
    }

    pub fn write(&self, dest: &Path) -> Result<PathBuf> {
        let file = self.output_file(dest);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).io_context("creating output directory", parent)?;
        }
        fs::write(&file, self.output()).io_context("writing output", &file)?;
        trace!(url = %self.url, path = %file.display(), "content written");
        Ok(file)
    }
}

/// Explicit `excerpt` meta wins, then the head before `separator`, then the whole body.
/// The flag is set only for a separator split.
pub fn extract_excerpt(meta: &Meta, body: &str, separator: &str) -> (String, bool) {
    if let Some(excerpt) = meta.get_string("excerpt") {
        return (excerpt, false);
    }

    if !separator.is_empty() {
        if let Some(index) = body.find(separator) {
            let head = &body[..index];
            if index > 0 && !head.trim().is_empty() {
                return (head.to_string(), true);
            }
        }
    }

    (body.to_string(), false)
}

/// Date descending, url ascending on ties. Undated units sort last.
pub fn compare_by_date(a: &Content, b: &Content) -> Ordering {
    b.date.cmp(&a.date).then_with(|| a.url.cmp(&b.url))
}

pub fn sort_by_date(ids: &mut [ContentId], contents: &[Content]) {
    ids.sort_by(|a, b| compare_by_date(&contents[a.0], &contents[b.0]));
}

/// Links each unit to its neighbours in `ids` order; `next` is the following item.
pub fn link_siblings(ids: &[ContentId], contents: &mut [Content]) {
    for (index, id) in ids.iter().enumerate() {
        let content = &mut contents[id.0];
        content.previous = index.checked_sub(1).map(|previous| ids[previous]);
        content.next = ids.get(index + 1).copied();
    }
}

/// A file copied verbatim to the destination.
#[derive(Debug, Clone)]
pub struct StaticFile {
    pub entry: SourceEntry,
}

impl StaticFile {
    pub fn new(entry: SourceEntry) -> Self {
        Self { entry }
    }

    pub fn output_file(&self, dest: &Path) -> PathBuf {
        dest.join(self.entry.relative().trim_start_matches('/'))
    }

    pub fn is_up_to_date(&self, dest: &Path) -> bool {
        fs::metadata(self.output_file(dest))
            .ok()
            .and_then(|metadata| {
                let modified = metadata.modified().ok()?;
                Some(modified >= self.entry.modified && metadata.len() == self.entry.len)
            })
            .unwrap_or(false)
    }

    /// Copies the file unless the destination is already current. Returns whether it copied.
    pub fn write(&self, dest: &Path) -> Result<bool> {
        if self.is_up_to_date(dest) {
            return Ok(false);
        }
        let target = self.output_file(dest);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).io_context("creating output directory", parent)?;
        }
        fs::copy(&self.entry.file, &target).io_context("copying static file", &self.entry.file)?;
        trace!(path = %target.display(), "static file copied");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    fn source(dir: &Path, relative: &str, meta: Value, body: &str) -> Source {
        let file = dir.join(relative);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, body).unwrap();
        Source {
            entry: SourceEntry::new(dir, &file).unwrap(),
            meta: Meta {
                raw: meta.as_object().cloned().unwrap_or_default(),
            },
            body: body.to_string(),
        }
    }

    fn config(dir: &Path, values: Value) -> (Config, SiteConfig) {
        let config = Config::from_values(dir, values.as_object().cloned().unwrap_or_default());
        let site = config.site().unwrap();
        (config, site)
    }

    #[test]
    fn test_post_from_file_name_date() {
        let dir = TempDir::new().unwrap();
        let (config, site) = config(dir.path(), json!({}));
        let source = source(
            dir.path(),
            "2024-03-01-hello.md",
            json!({ "layout": "post", "title": "Hello" }),
            "Intro\n<!--more-->\nRest",
        );

        let post = Content::from_source(source, ".html", &config, &site).unwrap();
        assert!(post.is_post());
        assert_eq!(post.url, "/hello/");
        assert_eq!(post.date.unwrap().format("%Y-%m-%d").to_string(), "2024-03-01");

        let data = post.post_data().unwrap();
        assert_eq!(data.id, "/hello/");
        assert_eq!(data.excerpt, "Intro\n");
        assert!(data.excerpt_extracted);
        assert_eq!(
            post.output_file(Path::new("/out")),
            PathBuf::from("/out/hello/index.html")
        );
    }

    #[test]
    fn test_post_without_date_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (config, site) = config(dir.path(), json!({}));
        let source = source(dir.path(), "hello.md", json!({ "layout": "post" }), "x");

        let result = Content::from_source(source, ".html", &config, &site);
        assert!(matches!(result, Err(PressError::MissingField { field, .. }) if field == "date"));
    }

    #[test]
    fn test_permalink_sources() {
        let dir = TempDir::new().unwrap();
        let (config, site) = config(
            dir.path(),
            json!({
                "permalink": "/${year}/${month}/${name}.html",
                "permalink_doc": "/docs/${name}/"
            }),
        );

        let post = source(
            dir.path(),
            "posts/2024-05-09-first.md",
            json!({ "layout": "post" }),
            "x",
        );
        let post = Content::from_source(post, ".html", &config, &site).unwrap();
        assert_eq!(post.url, "/2024/05/first.html");

        let doc = source(dir.path(), "guide.md", json!({ "layout": "doc" }), "x");
        let doc = Content::from_source(doc, ".html", &config, &site).unwrap();
        assert_eq!(doc.url, "/docs/guide/");

        let explicit = source(
            dir.path(),
            "other.md",
            json!({ "layout": "doc", "permalink": "${name}-x.html" }),
            "x",
        );
        let explicit = Content::from_source(explicit, ".html", &config, &site).unwrap();
        assert_eq!(explicit.url, "/other-x.html");

        let broken = source(dir.path(), "bad.md", json!({ "permalink": "/${nope}/" }), "x");
        assert!(matches!(
            Content::from_source(broken, ".html", &config, &site),
            Err(PressError::InvalidPermalink { .. })
        ));
    }

    #[test]
    fn test_draft_and_url_flags() {
        let dir = TempDir::new().unwrap();
        let (config, site) = config(dir.path(), json!({}));
        let draft = source(
            dir.path(),
            "c sharp.md",
            json!({ "title": "Notes", "published": false, "url_encode": true }),
            "x",
        );

        let page = Content::from_source(draft, ".html", &config, &site).unwrap();
        assert!(!page.published);
        assert_eq!(page.title.as_deref(), Some("[Draft] Notes"));
        assert_eq!(page.url, "/c%20sharp.html");
        assert_eq!(
            page.output_file(Path::new("/out")),
            PathBuf::from("/out/c sharp.html")
        );
    }

    #[test]
    fn test_excerpt_rules() {
        let mut meta = Meta::default();
        assert_eq!(extract_excerpt(&meta, "a<!--more-->b", "<!--more-->"), ("a".to_string(), true));
        assert_eq!(
            extract_excerpt(&meta, "<!--more-->b", "<!--more-->"),
            ("<!--more-->b".to_string(), false)
        );
        assert_eq!(
            extract_excerpt(&meta, "  \n<!--more-->b", "<!--more-->"),
            ("  \n<!--more-->b".to_string(), false)
        );

        meta.insert("excerpt", "Given");
        assert_eq!(extract_excerpt(&meta, "a<!--more-->b", "<!--more-->"), ("Given".to_string(), false));
    }

    #[test]
    fn test_sort_and_link() {
        let dir = TempDir::new().unwrap();
        let (config, site) = config(dir.path(), json!({}));
        let mut contents: Vec<Content> = ["2024-01-01-a.md", "2024-03-01-b.md", "2024-02-01-c.md"]
            .iter()
            .map(|name| {
                let source = source(dir.path(), name, json!({ "layout": "post" }), "x");
                Content::from_source(source, ".html", &config, &site).unwrap()
            })
            .collect();

        let mut ids = vec![ContentId(0), ContentId(1), ContentId(2)];
        sort_by_date(&mut ids, &contents);
        assert_eq!(ids, vec![ContentId(1), ContentId(2), ContentId(0)]);

        link_siblings(&ids, &mut contents);
        assert_eq!(contents[1].previous, None);
        assert_eq!(contents[1].next, Some(ContentId(2)));
        assert_eq!(contents[2].previous, Some(ContentId(1)));
        assert_eq!(contents[0].next, None);
    }

    #[test]
    fn test_list_holder() {
        let mut holder: ListHolder<usize> = ListHolder::default();
        holder.get_or_create("tag").push(1);
        holder.get_or_create("series").push(2);
        holder.get_or_create("tag").push(3);

        assert_eq!(holder.get("tag"), Some(&[1, 3][..]));
        assert_eq!(holder.keys().collect::<Vec<_>>(), vec!["tag", "series"]);
        assert_eq!(holder.values().count(), 3);
        assert!(holder.get("missing").is_none());
    }

    #[test]
    fn test_static_file_skips_current_copy() {
        let dir = TempDir::new().unwrap();
        let assets = dir.path().join("assets");
        let dest = dir.path().join("public");
        fs::create_dir_all(assets.join("css")).unwrap();
        fs::write(assets.join("css/site.css"), "body {}").unwrap();

        let entry = SourceEntry::new(&assets, &assets.join("css/site.css")).unwrap();
        let file = StaticFile::new(entry);

        assert!(file.write(&dest).unwrap());
        assert!(dest.join("css/site.css").is_file());
        assert!(!file.write(&dest).unwrap());
    }
}
