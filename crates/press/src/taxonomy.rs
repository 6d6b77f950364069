use crate::content::ContentId;
use crate::error::{PressError, Result};
use crate::links::{SlugHelper, value_to_string};
use crate::source::Meta;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

pub const CATEGORY_PATH_SEPARATOR: char = '/';
pub const DEFAULT_BREADCRUMB_SEPARATOR: &str = " > ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TagId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CategoryId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum MetaTagRef {
    Tag(TagId),
    Category(CategoryId),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMetaTagConfig {
    #[serde(alias = "metaForCollection")]
    meta_for_collection: Option<String>,
    alias: Vec<String>,
    separator: Option<String>,
    names: Map<String, Value>,
    output_dir: Option<String>,
    hierarchical: Option<bool>,
    breadcrumb_separator: Option<String>,
}

/// One taxonomy dimension of a collection, e.g. `tag` or `category`.
#[derive(Debug, Clone)]
pub struct MetaTagConfig {
    pub meta: String,
    pub meta_for_collection: String,
    pub alias: Vec<String>,
    pub separator: Option<String>,
    /// Declared values: slug (or category path) to display name, sorted by key.
    pub names: Vec<(String, String)>,
    pub output_dir: String,
    pub hierarchical: bool,
    pub breadcrumb_separator: String,
    pub properties: Map<String, Value>,
}

impl MetaTagConfig {
    pub fn from_entry(meta: &str, value: &Value) -> Result<Self> {
        if meta.trim().is_empty() {
            return Err(PressError::InvalidConfig {
                key: "collections".to_string(),
                message: "taxonomy entry without a meta name".to_string(),
            });
        }

        let properties = value.as_object().cloned().unwrap_or_default();
        let raw: RawMetaTagConfig = if value.is_null() {
            RawMetaTagConfig::default()
        } else {
            serde_json::from_value(value.clone()).map_err(|error| PressError::InvalidConfig {
                key: meta.to_string(),
                message: error.to_string(),
            })?
        };

        let mut names: Vec<(String, String)> = raw
            .names
            .iter()
            .map(|(key, name)| (key.clone(), value_to_string(name)))
            .collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            meta: meta.to_string(),
            meta_for_collection: raw.meta_for_collection.unwrap_or_else(|| meta.to_string()),
            alias: raw.alias,
            separator: raw.separator,
            names,
            output_dir: raw
                .output_dir
                .map(|dir| dir.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("/{meta}")),
            hierarchical: raw.hierarchical.unwrap_or(true),
            breadcrumb_separator: raw
                .breadcrumb_separator
                .unwrap_or_else(|| DEFAULT_BREADCRUMB_SEPARATOR.to_string()),
            properties,
        })
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).filter(|value| !value.is_null())
    }

    /// Values for this dimension in `meta`, from the main key then each alias.
    pub fn extract_values(&self, meta: &Meta) -> Vec<String> {
        let mut values = Vec::new();
        for key in std::iter::once(&self.meta).chain(self.alias.iter()) {
            match meta.get(key) {
                Some(Value::Array(items)) => values.extend(
                    items
                        .iter()
                        .map(value_to_string)
                        .map(|item| item.trim().to_string())
                        .filter(|item| !item.is_empty()),
                ),
                Some(value) => {
                    let text = value_to_string(value);
                    if text.trim().is_empty() {
                        continue;
                    }
                    match &self.separator {
                        Some(separator) if !separator.is_empty() => values.extend(
                            text.split(separator.as_str())
                                .map(str::trim)
                                .filter(|item| !item.is_empty())
                                .map(String::from),
                        ),
                        _ => values.push(text.trim().to_string()),
                    }
                }
                None => {}
            }
        }
        values
    }
}

#[derive(Debug, Clone)]
pub struct Tag {
    pub slug: String,
    pub name: String,
    pub url: String,
    pub pages: Vec<ContentId>,
    pub page: Option<ContentId>,
    pub config: Arc<MetaTagConfig>,
}

#[derive(Debug, Clone)]
pub struct Category {
    pub slug: String,
    pub name: String,
    pub url: String,
    pub pages: Vec<ContentId>,
    pub page: Option<ContentId>,
    pub config: Arc<MetaTagConfig>,
    pub parent: Option<CategoryId>,
    pub children: Vec<CategoryId>,
    /// Dotted path from the root category, e.g. `asia.china`.
    pub path: String,
    /// Breadcrumb title, e.g. `Asia > China`.
    pub title: String,
}

fn is_name_or_slug(slug: &str, name: &str, value: &str) -> bool {
    value == slug || value == name
}

impl Tag {
    pub fn is_name_or_slug(&self, value: &str) -> bool {
        is_name_or_slug(&self.slug, &self.name, value)
    }
}

impl Category {
    pub fn is_name_or_slug(&self, value: &str) -> bool {
        is_name_or_slug(&self.slug, &self.name, value)
    }
}

/// Arena holding every tag and category of a build.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    tags: Vec<Tag>,
    categories: Vec<Category>,
}

impl Taxonomy {
    pub fn tag(&self, id: TagId) -> &Tag {
        &self.tags[id.0]
    }

    pub fn tag_mut(&mut self, id: TagId) -> &mut Tag {
        &mut self.tags[id.0]
    }

    pub fn category(&self, id: CategoryId) -> &Category {
        &self.categories[id.0]
    }

    pub fn category_mut(&mut self, id: CategoryId) -> &mut Category {
        &mut self.categories[id.0]
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn pages_of(&self, meta_tag: MetaTagRef) -> &[ContentId] {
        match meta_tag {
            MetaTagRef::Tag(id) => &self.tag(id).pages,
            MetaTagRef::Category(id) => &self.category(id).pages,
        }
    }

    pub fn set_page(&mut self, meta_tag: MetaTagRef, page: ContentId, url: &str) {
        match meta_tag {
            MetaTagRef::Tag(id) => {
                let tag = self.tag_mut(id);
                tag.page = Some(page);
                tag.url = url.to_string();
            }
            MetaTagRef::Category(id) => {
                let category = self.category_mut(id);
                category.page = Some(page);
                category.url = url.to_string();
            }
        }
    }

    pub fn create_tag(&mut self, slug: &str, name: &str, config: &Arc<MetaTagConfig>) -> TagId {
        let id = TagId(self.tags.len());
        self.tags.push(Tag {
            slug: slug.to_string(),
            name: name.to_string(),
            url: format!("{}/{}/", config.output_dir, slug),
            pages: Vec::new(),
            page: None,
            config: Arc::clone(config),
        });
        id
    }

    pub fn create_category(
        &mut self,
        slug: &str,
        name: &str,
        parent: Option<CategoryId>,
        config: &Arc<MetaTagConfig>,
    ) -> CategoryId {
        let id = CategoryId(self.categories.len());
        let (path, url, title) = match parent {
            Some(parent_id) => {
                let parent = self.category(parent_id);
                let url = if config.hierarchical {
                    format!("{}{}/", parent.url, slug)
                } else {
                    format!("{}/{}/", config.output_dir, slug)
                };
                (
                    format!("{}.{}", parent.path, slug),
                    url,
                    format!("{}{}{}", parent.title, config.breadcrumb_separator, name),
                )
            }
            None => (
                slug.to_string(),
                format!("{}/{}/", config.output_dir, slug),
                name.to_string(),
            ),
        };

        self.categories.push(Category {
            slug: slug.to_string(),
            name: name.to_string(),
            url,
            pages: Vec::new(),
            page: None,
            config: Arc::clone(config),
            parent,
            children: Vec::new(),
            path,
            title,
        });

        if let Some(parent_id) = parent {
            self.category_mut(parent_id).children.push(id);
        }
        id
    }

    /// Orders tags by slug, then name.
    pub fn sort_tags(&self, list: &mut [TagId]) {
        list.sort_by(|a, b| {
            let (a, b) = (self.tag(*a), self.tag(*b));
            a.slug.cmp(&b.slug).then_with(|| a.name.cmp(&b.name))
        });
    }

    pub fn sort_categories(&self, list: &mut [CategoryId]) {
        list.sort_by(|a, b| {
            let (a, b) = (self.category(*a), self.category(*b));
            a.slug.cmp(&b.slug).then_with(|| a.name.cmp(&b.name))
        });
    }

    /// Pre-registers the declared tag names so empty taxonomies still get pages.
    pub fn declare_tags(&mut self, config: &Arc<MetaTagConfig>, list: &mut Vec<TagId>) {
        for (slug, name) in &config.names {
            debug!(meta = %config.meta, slug = %slug, "declared tag");
            let id = self.create_tag(slug, name, config);
            list.push(id);
        }
    }

    /// Pre-registers declared categories. Keys are `/`-separated paths whose parent
    /// must be declared in the same batch.
    pub fn declare_categories(
        &mut self,
        config: &Arc<MetaTagConfig>,
        list: &mut Vec<CategoryId>,
    ) -> Result<()> {
        let mut declared: Vec<(String, CategoryId)> = Vec::new();

        for (key, name) in &config.names {
            let (parent, slug) = match key.rfind(CATEGORY_PATH_SEPARATOR) {
                Some(index) => {
                    let parent_key = &key[..index];
                    let parent = declared
                        .iter()
                        .find(|(declared_key, _)| declared_key == parent_key)
                        .map(|(_, id)| *id)
                        .ok_or_else(|| PressError::UnknownParentCategory {
                            path: parent_key.to_string(),
                        })?;
                    (Some(parent), &key[index + 1..])
                }
                None => (None, key.as_str()),
            };

            debug!(meta = %config.meta, path = %key, "declared category");
            let id = self.create_category(slug, name, parent, config);
            declared.push((key.clone(), id));
            list.push(id);
        }

        Ok(())
    }

    /// Finds or creates a tag for each value and records `page` as a member.
    pub fn resolve_tags(
        &mut self,
        values: &[String],
        config: &Arc<MetaTagConfig>,
        list: &mut Vec<TagId>,
        slugs: &dyn SlugHelper,
        page: ContentId,
    ) -> Result<Vec<TagId>> {
        let mut resolved = Vec::new();
        for value in values {
            let existing = list
                .iter()
                .copied()
                .find(|id| self.tag(*id).is_name_or_slug(value));

            let id = match existing {
                Some(id) => id,
                None => {
                    let id = self.create_tag(&slugs.to_slug(value)?, value, config);
                    list.push(id);
                    id
                }
            };

            let tag = self.tag_mut(id);
            if !tag.pages.contains(&page) {
                tag.pages.push(page);
            }
            if !resolved.contains(&id) {
                resolved.push(id);
            }
        }
        Ok(resolved)
    }

    /// Finds or creates a category for each value and records `page` as a member.
    /// A value containing `/` names a child whose parent path must already exist.
    pub fn resolve_categories(
        &mut self,
        values: &[String],
        config: &Arc<MetaTagConfig>,
        list: &mut Vec<CategoryId>,
        slugs: &dyn SlugHelper,
        page: ContentId,
    ) -> Result<Vec<CategoryId>> {
        let mut resolved = Vec::new();
        for value in values {
            let id = match self.find_category(list, value) {
                Some(id) => id,
                None => {
                    let id = match value.rfind(CATEGORY_PATH_SEPARATOR) {
                        Some(index) => {
                            let parent_key = &value[..index];
                            let parent = self.find_category(list, parent_key).ok_or_else(|| {
                                PressError::UnknownParentCategory {
                                    path: parent_key.to_string(),
                                }
                            })?;
                            let name = &value[index + 1..];
                            self.create_category(&slugs.to_slug(name)?, name, Some(parent), config)
                        }
                        None => self.create_category(&slugs.to_slug(value)?, value, None, config),
                    };
                    list.push(id);
                    id
                }
            };

            let category = self.category_mut(id);
            if !category.pages.contains(&page) {
                category.pages.push(page);
            }
            if !resolved.contains(&id) {
                resolved.push(id);
            }
        }
        Ok(resolved)
    }

    fn find_category(&self, list: &[CategoryId], value: &str) -> Option<CategoryId> {
        let dotted = value.replace(CATEGORY_PATH_SEPARATOR, ".");
        list.iter()
            .copied()
            .find(|id| {
                let category = self.category(*id);
                category.path == dotted || category.is_name_or_slug(value)
            })
    }
}
