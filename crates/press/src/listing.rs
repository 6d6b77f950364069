use crate::content::{Content, ContentId, ListHolder};
use crate::error::Result;
use crate::links::{expand_template, normalize_url, value_to_string};
use crate::pagination::{ConfigurablePaginationUpdater, paginate};
use crate::registry::Generator;
use crate::site::Site;
use crate::source::Meta;
use crate::taxonomy::{MetaTagConfig, MetaTagRef, Taxonomy};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub const TAG_TEMPLATE_PREFIX: &str = "tag_template_";
pub const CATEGORY_TEMPLATE_PREFIX: &str = "category_template_";

/// Template page meta first, then the taxonomy settings.
fn property(meta: &Meta, config: &MetaTagConfig, key: &str) -> Option<Value> {
    meta.get(key).or_else(|| config.property(key)).cloned()
}

struct ListingTarget {
    meta_tag: MetaTagRef,
    slug: String,
    name: String,
    path: String,
    url: String,
    members: Vec<ContentId>,
}

impl ListingTarget {
    fn collect(taxonomy: &Taxonomy, refs: impl Iterator<Item = MetaTagRef>) -> Vec<Self> {
        refs.filter_map(|meta_tag| {
            let target = match meta_tag {
                MetaTagRef::Tag(id) => {
                    let tag = taxonomy.tag(id);
                    Self {
                        meta_tag,
                        slug: tag.slug.clone(),
                        name: tag.name.clone(),
                        path: tag.slug.clone(),
                        url: tag.url.clone(),
                        members: tag.pages.clone(),
                    }
                }
                MetaTagRef::Category(id) => {
                    let category = taxonomy.category(id);
                    Self {
                        meta_tag,
                        slug: category.slug.clone(),
                        name: category.name.clone(),
                        path: category.path.clone(),
                        url: category.url.clone(),
                        members: category.pages.clone(),
                    }
                }
            };
            (!target.members.is_empty()).then_some(target)
        })
        .collect()
    }
}

/// Clones a taxonomy template page into one listing page per tag or category.
#[derive(Debug, Default)]
pub struct MetaTagPageGenerator;

impl MetaTagPageGenerator {
    fn find_template(site: &Site, marker: &str) -> Option<ContentId> {
        site.pages.iter().copied().find(|id| {
            site.contents[id.0]
                .meta
                .get(marker)
                .map(|value| value.as_bool().unwrap_or(true))
                .unwrap_or(false)
        })
    }

    fn listing_page(template: &Content, marker: &str, config: &MetaTagConfig, target: &ListingTarget) -> Result<Content> {
        let mut listing = template.clone();
        listing.generated = true;
        listing.converted = None;
        listing.rendered = None;
        listing.pager = None;
        listing.next = None;
        listing.previous = None;
        listing.tags = ListHolder::default();
        listing.categories = ListHolder::default();
        listing.meta.remove(marker);
        listing.meta_tag = Some(target.meta_tag);

        let prefix = property(&template.meta, config, "title_prefix")
            .map(|value| value_to_string(&value))
            .unwrap_or_default();
        let title = format!("{prefix}{}", target.name);
        listing.meta.insert("title", title.clone());
        listing.title = Some(title);

        let url = match property(&template.meta, config, "permalink") {
            Some(permalink) => {
                let mut params = Map::new();
                params.insert("slug".to_string(), Value::from(target.slug.as_str()));
                params.insert("name".to_string(), Value::from(target.name.as_str()));
                params.insert("path".to_string(), Value::from(target.path.replace('.', "/")));
                expand_template(&value_to_string(&permalink), &params)?
            }
            None => match template.meta.get_string("output_dir") {
                Some(output_dir) => format!(
                    "{}/{}/",
                    output_dir.trim_end_matches('/'),
                    target.path.replace('.', "/")
                ),
                None => target.url.clone(),
            },
        };
        listing.url = normalize_url(&url);
        Ok(listing)
    }

    fn generate_dimension(
        site: &mut Site,
        collection: &str,
        marker: &str,
        config: &Arc<MetaTagConfig>,
        refs: Vec<MetaTagRef>,
    ) -> Result<()> {
        let Some(template_id) = Self::find_template(site, marker) else {
            debug!(marker, "no listing template page");
            return Ok(());
        };
        if !site.template_pages.contains(&template_id) {
            site.template_pages.push(template_id);
        }

        let targets = ListingTarget::collect(&site.taxonomy, refs.into_iter());
        let page_size = property(&site.contents[template_id.0].meta, config, "paginate")
            .and_then(|value| value.as_u64())
            .unwrap_or(0) as usize;

        for target in &targets {
            let listing = Self::listing_page(&site.contents[template_id.0], marker, config, target)?;
            let url = listing.url.clone();
            let id = ContentId(site.contents.len());
            site.contents.push(listing);
            site.pages.push(id);
            site.taxonomy.set_page(target.meta_tag, id, &url);

            if page_size > 0 {
                let ids = paginate(
                    &mut site.contents,
                    id,
                    &target.members,
                    page_size,
                    &ConfigurablePaginationUpdater,
                )?;
                site.pages.extend(ids.into_iter().skip(1));
            }
        }

        info!(
            collection,
            dimension = %config.meta,
            pages = targets.len(),
            "listing pages generated"
        );
        Ok(())
    }
}

impl Generator for MetaTagPageGenerator {
    fn name(&self) -> &str {
        "meta_tag_pages"
    }

    fn order(&self) -> i32 {
        3000
    }

    fn generate(&self, site: &mut Site) -> Result<()> {
        let mut work = Vec::new();
        for collection in &site.collections {
            for dimension in &collection.config.tags {
                let refs = collection
                    .tags
                    .get(&dimension.meta_for_collection)
                    .unwrap_or_default()
                    .iter()
                    .map(|id| MetaTagRef::Tag(*id))
                    .collect::<Vec<_>>();
                let marker = format!("{TAG_TEMPLATE_PREFIX}{}_{}", collection.name, dimension.meta);
                work.push((collection.name.clone(), marker, Arc::clone(dimension), refs));
            }
            for dimension in &collection.config.categories {
                let refs = collection
                    .categories
                    .get(&dimension.meta_for_collection)
                    .unwrap_or_default()
                    .iter()
                    .map(|id| MetaTagRef::Category(*id))
                    .collect::<Vec<_>>();
                let marker =
                    format!("{CATEGORY_TEMPLATE_PREFIX}{}_{}", collection.name, dimension.meta);
                work.push((collection.name.clone(), marker, Arc::clone(dimension), refs));
            }
        }

        for (collection, marker, config, refs) in work {
            Self::generate_dimension(site, &collection, &marker, &config, refs)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::site::SiteBuilder;
    use crate::taxonomy::MetaTagRef;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, content: &str) {
        let file = dir.join(relative);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, content).unwrap();
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "posts/2024-01-01-a.md",
            "---\nlayout: post\ntags: [rust]\ncategories: [asia]\n---\na\n",
        );
        write(
            dir.path(),
            "posts/2024-01-02-b.md",
            "---\nlayout: post\ntags: [rust, c sharp]\ncategories: [asia/china]\n---\nb\n",
        );
        write(
            dir.path(),
            "posts/2024-01-03-c.md",
            "---\nlayout: post\ntags: rust\n---\nc\n",
        );
        write(
            dir.path(),
            "pages/tag.html",
            "---\ntag_template_post_tag: true\ntitle_prefix: \"Tag: \"\npaginate: 2\n---\nlist\n",
        );
        write(
            dir.path(),
            "pages/category.html",
            "---\ncategory_template_post_category: true\n---\nlist\n",
        );
        dir
    }

    #[test]
    fn test_listing_pages_for_tags_and_categories() {
        let dir = fixture();
        let mut site = SiteBuilder::new(dir.path()).build().unwrap();
        site.setup().unwrap();
        site.reset().unwrap();
        site.read().unwrap();
        site.generate().unwrap();

        let urls: Vec<&str> = site
            .pages
            .iter()
            .map(|id| site.contents[id.0].url.as_str())
            .collect();
        assert!(urls.contains(&"/tag/rust/"));
        assert!(urls.contains(&"/tag/rust/page/2/"));
        assert!(urls.contains(&"/tag/c sharp/"));
        assert!(urls.contains(&"/category/asia/"));
        assert!(urls.contains(&"/category/asia/china/"));
        assert!(!urls.contains(&"/tag.html"));
        assert!(!urls.contains(&"/category.html"));

        let rust_page = site
            .pages
            .iter()
            .map(|id| &site.contents[id.0])
            .find(|content| content.url == "/tag/rust/")
            .unwrap();
        assert_eq!(rust_page.title.as_deref(), Some("Tag: rust"));
        assert_eq!(rust_page.pager.as_ref().unwrap().total_pages, 2);
        assert!(!rust_page.meta.contains_key("tag_template_post_tag"));

        let Some(MetaTagRef::Tag(tag)) = rust_page.meta_tag else {
            panic!("listing page without tag");
        };
        assert_eq!(site.taxonomy.tag(tag).url, "/tag/rust/");
        assert!(site.taxonomy.tag(tag).page.is_some());
    }

    #[test]
    fn test_permalink_property_from_config() {
        let dir = fixture();
        write(
            dir.path(),
            "config.yml",
            "collections:\n  post:\n    tags:\n      tag:\n        alias: [tags]\n        permalink: /topics/${slug}.html\n    categories:\n      category:\n        alias: [categories]\n",
        );

        let mut site = SiteBuilder::new(dir.path()).build().unwrap();
        site.setup().unwrap();
        site.reset().unwrap();
        site.read().unwrap();
        site.generate().unwrap();

        let urls: Vec<&str> = site
            .pages
            .iter()
            .map(|id| site.contents[id.0].url.as_str())
            .collect();
        assert!(urls.contains(&"/topics/rust.html"));
        assert!(urls.contains(&"/topics/rust-p2.html"));
        assert!(urls.contains(&"/category/asia/china/"));
    }
}
