use crate::content::{Content, ContentId, ListHolder, link_siblings, sort_by_date};
use crate::error::{PressError, Result};
use crate::registry::{Processor, Stage};
use crate::site::Site;
use crate::taxonomy::{CategoryId, MetaTagConfig, TagId};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub const POST_COLLECTION: &str = "post";
pub const PAGE_COLLECTION: &str = "page";

/// Predicate selecting the members of a collection.
pub trait ContentFilter: Send + Sync + std::fmt::Debug {
    fn matches(&self, content: &Content) -> bool;
}

#[derive(Debug, Clone)]
pub struct LayoutFilter {
    pub layout: String,
    pub equals: bool,
}

impl ContentFilter for LayoutFilter {
    fn matches(&self, content: &Content) -> bool {
        (content.layout.as_deref() == Some(self.layout.as_str())) == self.equals
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KindFilter {
    pub post: bool,
}

impl ContentFilter for KindFilter {
    fn matches(&self, content: &Content) -> bool {
        content.is_post() == self.post
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AllFilter;

impl ContentFilter for AllFilter {
    fn matches(&self, _content: &Content) -> bool {
        true
    }
}

/// Resolves `{ name, args }` filter settings, or the default for the collection name.
pub fn resolve_filter(collection: &str, settings: Option<&Value>) -> Result<Box<dyn ContentFilter>> {
    let Some(settings) = settings else {
        return Ok(match collection {
            POST_COLLECTION => Box::new(KindFilter { post: true }),
            PAGE_COLLECTION => Box::new(KindFilter { post: false }),
            layout => Box::new(LayoutFilter {
                layout: layout.to_string(),
                equals: true,
            }),
        });
    };

    let (name, args) = match settings {
        Value::String(name) => (name.as_str(), Vec::new()),
        Value::Object(map) => (
            map.get("name").and_then(Value::as_str).unwrap_or("layout"),
            map.get("args")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        ),
        _ => {
            return Err(PressError::InvalidConfig {
                key: format!("collections.{collection}.filter"),
                message: "expected a filter name or a { name, args } mapping".to_string(),
            });
        }
    };

    match name {
        "layout" => Ok(Box::new(LayoutFilter {
            layout: args
                .first()
                .and_then(Value::as_str)
                .unwrap_or(collection)
                .to_string(),
            equals: args.get(1).and_then(Value::as_bool).unwrap_or(true),
        })),
        "kind" => Ok(Box::new(KindFilter {
            post: args.first().and_then(Value::as_str).unwrap_or(collection) == POST_COLLECTION,
        })),
        "all" => Ok(Box::new(AllFilter)),
        other => Err(PressError::UnknownExtension {
            kind: "filter",
            name: other.to_string(),
        }),
    }
}

#[derive(Debug)]
pub struct CollectionConfig {
    pub filter: Box<dyn ContentFilter>,
    pub tags: Vec<Arc<MetaTagConfig>>,
    pub categories: Vec<Arc<MetaTagConfig>>,
    pub sortable: bool,
}

impl CollectionConfig {
    pub fn from_value(name: &str, value: &Value) -> Result<Self> {
        let empty = Map::new();
        let settings = value.as_object().unwrap_or(&empty);

        let dimensions = |key: &str| -> Result<Vec<Arc<MetaTagConfig>>> {
            settings
                .get(key)
                .and_then(Value::as_object)
                .map(|map| {
                    map.iter()
                        .map(|(meta, value)| MetaTagConfig::from_entry(meta, value).map(Arc::new))
                        .collect()
                })
                .unwrap_or_else(|| Ok(Vec::new()))
        };

        Ok(Self {
            filter: resolve_filter(name, settings.get("filter"))?,
            tags: dimensions("tags")?,
            categories: dimensions("categories")?,
            sortable: name == POST_COLLECTION
                || settings
                    .get("sortable")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
        })
    }
}

/// Named, filtered group of pages with its own taxonomy.
#[derive(Debug)]
pub struct Collection {
    pub name: String,
    pub config: Arc<CollectionConfig>,
    pub pages: Vec<ContentId>,
    pub tags: ListHolder<TagId>,
    pub categories: ListHolder<CategoryId>,
}

/// Builds every configured collection from the discovered pages.
pub fn build_collections(site: &mut Site) -> Result<()> {
    let settings = site
        .config()
        .get("collections")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let discovered: Vec<ContentId> = (0..site.contents.len())
        .map(ContentId)
        .filter(|id| !site.contents[id.0].generated)
        .collect();

    let slugs = site.slug_helper();
    let mut collections = Vec::with_capacity(settings.len());

    for (name, value) in &settings {
        let config = Arc::new(CollectionConfig::from_value(name, value)?);
        let pages: Vec<ContentId> = discovered
            .iter()
            .copied()
            .filter(|id| config.filter.matches(&site.contents[id.0]))
            .collect();

        let mut collection = Collection {
            name: name.clone(),
            config: Arc::clone(&config),
            pages,
            tags: ListHolder::default(),
            categories: ListHolder::default(),
        };

        for dimension in &config.tags {
            let list = collection.tags.get_or_create(&dimension.meta_for_collection);
            site.taxonomy.declare_tags(dimension, list);

            for id in &collection.pages {
                let values = dimension.extract_values(&site.contents[id.0].meta);
                if values.is_empty() {
                    continue;
                }
                let resolved =
                    site.taxonomy
                        .resolve_tags(&values, dimension, list, slugs.as_ref(), *id)?;
                let held = site.contents[id.0].tags.get_or_create(&dimension.meta);
                for tag in resolved {
                    if !held.contains(&tag) {
                        held.push(tag);
                    }
                }
            }
        }

        for dimension in &config.categories {
            let list = collection
                .categories
                .get_or_create(&dimension.meta_for_collection);
            site.taxonomy.declare_categories(dimension, list)?;

            for id in &collection.pages {
                let values = dimension.extract_values(&site.contents[id.0].meta);
                if values.is_empty() {
                    continue;
                }
                let resolved = site.taxonomy.resolve_categories(
                    &values,
                    dimension,
                    list,
                    slugs.as_ref(),
                    *id,
                )?;
                let held = site.contents[id.0].categories.get_or_create(&dimension.meta);
                for category in resolved {
                    if !held.contains(&category) {
                        held.push(category);
                    }
                }
            }
        }

        for (_, list) in collection.tags.iter_mut() {
            site.taxonomy.sort_tags(list);
        }
        for (_, list) in collection.categories.iter_mut() {
            site.taxonomy.sort_categories(list);
        }

        if config.sortable {
            sort_by_date(&mut collection.pages, &site.contents);
            link_siblings(&collection.pages, &mut site.contents);

            for (_, list) in collection.tags.iter() {
                for tag in list {
                    let mut members = std::mem::take(&mut site.taxonomy.tag_mut(*tag).pages);
                    sort_by_date(&mut members, &site.contents);
                    site.taxonomy.tag_mut(*tag).pages = members;
                }
            }
            for (_, list) in collection.categories.iter() {
                for category in list {
                    let mut members =
                        std::mem::take(&mut site.taxonomy.category_mut(*category).pages);
                    sort_by_date(&mut members, &site.contents);
                    site.taxonomy.category_mut(*category).pages = members;
                }
            }
        }

        debug!(
            collection = %name,
            pages = collection.pages.len(),
            tags = collection.tags.values().count(),
            categories = collection.categories.values().count(),
            "collection built"
        );
        collections.push(collection);
    }

    if let Some(posts) = collections.iter().find(|collection| collection.name == POST_COLLECTION) {
        site.tags = posts.tags.clone();
        site.categories = posts.categories.clone();
    }

    info!(collections = collections.len(), "collections built");
    site.collections = collections;
    Ok(())
}

/// Builds collections after the read stage and drops listing templates after generation.
#[derive(Debug, Default)]
pub struct CollectionProcessor;

impl Processor for CollectionProcessor {
    fn name(&self) -> &str {
        "collections"
    }

    fn order(&self) -> i32 {
        10
    }

    fn process(&self, stage: Stage, site: &mut Site) -> Result<()> {
        match stage {
            Stage::Read => build_collections(site),
            Stage::Generate => {
                let templates = std::mem::take(&mut site.template_pages);
                if !templates.is_empty() {
                    debug!(count = templates.len(), "removing listing templates");
                    site.pages.retain(|id| !templates.contains(id));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::SiteBuilder;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &std::path::Path, relative: &str, content: &str) {
        let file = dir.join(relative);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, content).unwrap();
    }

    fn post(date: &str, tags: &str) -> String {
        format!("---\nlayout: post\ndate: {date}\ntags: [{tags}]\n---\nbody\n")
    }

    #[test]
    fn test_default_filters() {
        let post = resolve_filter("post", None).unwrap();
        let page = resolve_filter("page", None).unwrap();
        let custom = resolve_filter("note", None).unwrap();
        assert!(format!("{post:?}").contains("KindFilter"));
        assert!(format!("{page:?}").contains("post: false"));
        assert!(format!("{custom:?}").contains("note"));

        let settings = serde_json::json!({ "name": "layout", "args": ["doc", false] });
        let filter = resolve_filter("docs", Some(&settings)).unwrap();
        assert!(format!("{filter:?}").contains("equals: false"));

        assert!(resolve_filter("x", Some(&serde_json::json!("nope"))).is_err());
    }

    #[test]
    fn test_shared_tag_and_sorted_members() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "posts/a.md", &post("2024-01-01", "rust"));
        write(dir.path(), "posts/b.md", &post("2024-03-01", "rust, web"));
        write(dir.path(), "posts/c.md", &post("2024-02-01", "rust"));
        write(dir.path(), "pages/about.md", "---\ntitle: About\n---\nhi\n");

        let mut site = SiteBuilder::new(dir.path()).build().unwrap();
        site.setup().unwrap();
        site.reset().unwrap();
        site.read().unwrap();

        let posts = site.collection("post").unwrap();
        assert_eq!(posts.pages.len(), 3);
        assert_eq!(site.collection("page").unwrap().pages.len(), 1);

        let tags = site.tags.get("tag").unwrap();
        assert_eq!(tags.len(), 2);
        let rust = site.taxonomy.tag(tags[0]);
        assert_eq!(rust.name, "rust");
        assert_eq!(rust.pages.len(), 3);

        let dates: Vec<String> = rust
            .pages
            .iter()
            .map(|id| site.contents[id.0].date.unwrap().format("%m").to_string())
            .collect();
        assert_eq!(dates, vec!["03", "02", "01"]);

        let newest = posts.pages[0];
        assert_eq!(site.contents[newest.0].next, Some(posts.pages[1]));
        assert_eq!(site.contents[newest.0].tags.get("tag").unwrap().len(), 2);
    }

    #[test]
    fn test_tags_and_categories_sorted_by_slug() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "posts/a.md",
            "---\nlayout: post\ndate: 2024-01-01\ntags: [zeta, mid]\ncategories: [web]\n---\nx\n",
        );
        write(
            dir.path(),
            "posts/b.md",
            "---\nlayout: post\ndate: 2024-01-02\ntags: [alpha]\ncategories: [art]\n---\nx\n",
        );

        let mut site = SiteBuilder::new(dir.path()).build().unwrap();
        site.setup().unwrap();
        site.reset().unwrap();
        site.read().unwrap();

        let tags: Vec<&str> = site
            .tags
            .get("tag")
            .unwrap()
            .iter()
            .map(|id| site.taxonomy.tag(*id).slug.as_str())
            .collect();
        assert_eq!(tags, vec!["alpha", "mid", "zeta"]);

        let (_, categories) = site.categories.iter().next().unwrap();
        let categories: Vec<&str> = categories
            .iter()
            .map(|id| site.taxonomy.category(*id).slug.as_str())
            .collect();
        assert_eq!(categories, vec!["art", "web"]);
    }
}
