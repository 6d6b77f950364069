use crate::content::{Content, ContentId};
use crate::error::{PressError, Result};
use crate::links::{expand_template, normalize_url};
use crate::registry::Generator;
use crate::site::Site;
use crate::source::Meta;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

pub const DEFAULT_PAGINATION_COLLECTION: &str = "post";

/// One page-sized slice of a paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Pager {
    pub page_number: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub page_size: usize,
    pub items: Vec<ContentId>,
    /// Listing page owning this pager.
    pub page: ContentId,
    pub next: Option<ContentId>,
    pub previous: Option<ContentId>,
}

/// Decides the url and title suffix of pager pages after the first.
pub trait PaginationUpdater: Send + Sync {
    fn apply(&self, page: &mut Content, pager: &Pager) -> Result<()>;
}

/// `page/<n>/` under directory urls, a `-p<n>` suffix otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPaginationUpdater;

impl DefaultPaginationUpdater {
    pub fn url(base_url: &str, page_number: usize) -> String {
        if base_url.ends_with('/') {
            format!("{base_url}page/{page_number}/")
        } else {
            let (stem, extension) = split_extension(base_url);
            format!("{stem}-p{page_number}{extension}")
        }
    }

    pub fn title_suffix(page: &Content, page_number: usize) -> String {
        if page.title.is_some() {
            format!(" - Part {page_number}")
        } else {
            format!(" - Page {page_number}")
        }
    }
}

impl PaginationUpdater for DefaultPaginationUpdater {
    fn apply(&self, page: &mut Content, pager: &Pager) -> Result<()> {
        let suffix = Self::title_suffix(page, pager.page_number);
        page.url = Self::url(&page.url, pager.page_number);
        page.meta.insert("title_suffix", suffix);
        Ok(())
    }
}

/// Reads `pagination.permalink` and `pagination.title_suffix_format` from the page,
/// falling back to [`DefaultPaginationUpdater`] for whatever is missing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigurablePaginationUpdater;

impl PaginationUpdater for ConfigurablePaginationUpdater {
    fn apply(&self, page: &mut Content, pager: &Pager) -> Result<()> {
        let settings = pagination_settings(&page.meta);
        let permalink = settings.get("permalink").and_then(Value::as_str);
        let title_format = settings.get("title_suffix_format").and_then(Value::as_str);

        let params = pager_params(&page.url, pager);

        let suffix = match title_format {
            Some(format) => expand_template(format, &params)?,
            None => DefaultPaginationUpdater::title_suffix(page, pager.page_number),
        };
        page.url = match permalink {
            Some(template) => normalize_url(&expand_template(template, &params)?),
            None => DefaultPaginationUpdater::url(&page.url, pager.page_number),
        };
        page.meta.insert("title_suffix", suffix);
        Ok(())
    }
}

fn split_extension(url: &str) -> (&str, &str) {
    let slash = url.rfind('/').map(|index| index + 1).unwrap_or(0);
    match url[slash..].rfind('.') {
        Some(dot) if dot > 0 => url.split_at(slash + dot),
        _ => (url, ""),
    }
}

fn pager_params(base_url: &str, pager: &Pager) -> Map<String, Value> {
    let (stem, extension) = split_extension(base_url);
    let mut params = Map::new();
    params.insert("url".to_string(), Value::from(base_url));
    params.insert("urlWithoutExtension".to_string(), Value::from(stem));
    params.insert("urlExtension".to_string(), Value::from(extension));
    params.insert("pageSize".to_string(), Value::from(pager.page_size));
    params.insert("pageNumber".to_string(), Value::from(pager.page_number));
    params.insert("totalPages".to_string(), Value::from(pager.total_pages));
    params.insert("totalItems".to_string(), Value::from(pager.total_items));
    params
}

fn pagination_settings(meta: &Meta) -> Map<String, Value> {
    meta.get("pagination")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Splits `items` over `ceil(len / page_size)` pages. Page 1 is `page` itself,
/// the rest are clones appended to `contents`. Returns every pager page in order.
pub fn paginate(
    contents: &mut Vec<Content>,
    page: ContentId,
    items: &[ContentId],
    page_size: usize,
    updater: &dyn PaginationUpdater,
) -> Result<Vec<ContentId>> {
    if items.is_empty() || page_size == 0 {
        return Ok(Vec::new());
    }

    let total_pages = items.len().div_ceil(page_size);
    let template = contents[page.0].clone();
    let mut ids = Vec::with_capacity(total_pages);
    ids.push(page);

    for page_number in 2..=total_pages {
        let mut clone = template.clone();
        clone.generated = true;
        clone.converted = None;
        clone.rendered = None;
        let id = ContentId(contents.len());
        contents.push(clone);
        ids.push(id);
        debug!(page_number, "pager page created");
    }

    for (index, chunk) in items.chunks(page_size).enumerate() {
        let pager = Pager {
            page_number: index + 1,
            total_pages,
            total_items: items.len(),
            page_size,
            items: chunk.to_vec(),
            page: ids[index],
            next: ids.get(index + 1).copied(),
            previous: index.checked_sub(1).map(|previous| ids[previous]),
        };

        let content = &mut contents[ids[index].0];
        if pager.page_number > 1 {
            updater.apply(content, &pager)?;
        }
        content.pager = Some(pager);
    }

    Ok(ids)
}

/// Walks the pager chain from `from` to the pager numbered `page_number`.
pub fn page_for(contents: &[Content], from: ContentId, page_number: usize) -> Option<ContentId> {
    let mut current = from;
    loop {
        let pager = contents[current.0].pager.as_ref()?;
        if pager.page_number == page_number {
            return Some(current);
        }
        current = if page_number > pager.page_number {
            pager.next?
        } else {
            pager.previous?
        };
    }
}

/// True for pages that serve as listing templates for a taxonomy.
pub fn is_template_page(content: &Content) -> bool {
    content.meta.raw.keys().any(|key| {
        key.starts_with(crate::listing::TAG_TEMPLATE_PREFIX)
            || key.starts_with(crate::listing::CATEGORY_TEMPLATE_PREFIX)
    })
}

/// Paginates the pages carrying `pagination` or `paginate` meta over a collection.
#[derive(Debug, Default)]
pub struct PaginationGenerator;

impl PaginationGenerator {
    fn page_size(content: &Content, default: Option<usize>) -> Result<usize> {
        content
            .meta
            .get_as::<usize>("paginate")
            .or_else(|| {
                pagination_settings(&content.meta)
                    .get("size")
                    .and_then(Value::as_u64)
                    .map(|size| size as usize)
            })
            .or(default)
            .filter(|size| *size > 0)
            .ok_or_else(|| PressError::MissingPageSize {
                url: content.url.clone(),
            })
    }
}

impl Generator for PaginationGenerator {
    fn name(&self) -> &str {
        "pagination"
    }

    fn order(&self) -> i32 {
        2000
    }

    fn generate(&self, site: &mut Site) -> Result<()> {
        let candidates: Vec<ContentId> = site
            .pages
            .iter()
            .copied()
            .filter(|id| {
                let content = &site.contents[id.0];
                !content.generated
                    && !is_template_page(content)
                    && (content.meta.contains_key("pagination")
                        || content.meta.contains_key("paginate"))
            })
            .collect();

        for id in candidates {
            let content = &site.contents[id.0];
            let collection_name = pagination_settings(&content.meta)
                .get("collection")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_PAGINATION_COLLECTION)
                .to_string();
            let page_size = Self::page_size(content, site.settings().paginate)?;

            let items = site
                .collection(&collection_name)
                .map(|collection| collection.pages.clone())
                .unwrap_or_default();

            if items.is_empty() {
                warn!(url = %content.url, collection = %collection_name, "nothing to paginate");
                continue;
            }

            let ids = paginate(
                &mut site.contents,
                id,
                &items,
                page_size,
                &ConfigurablePaginationUpdater,
            )?;
            info!(
                url = %site.contents[id.0].url,
                collection = %collection_name,
                pages = ids.len(),
                "paginated"
            );
            site.pages.extend(ids.into_iter().skip(1));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::source::{Source, SourceEntry};
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn page(dir: &Path, name: &str, meta: Value) -> Content {
        let file = dir.join(name);
        fs::write(&file, "x").unwrap();
        let config = Config::from_values(dir, Map::new());
        let source = Source {
            entry: SourceEntry::new(dir, &file).unwrap(),
            meta: Meta {
                raw: meta.as_object().cloned().unwrap_or_default(),
            },
            body: "x".to_string(),
        };
        Content::from_source(source, ".html", &config, &config.site().unwrap()).unwrap()
    }

    fn items(count: usize) -> Vec<ContentId> {
        (100..100 + count).map(ContentId).collect()
    }

    #[test]
    fn test_ten_items_by_four() {
        let dir = TempDir::new().unwrap();
        let mut contents = vec![page(dir.path(), "index.html", json!({ "title": "Blog" }))];

        let ids = paginate(
            &mut contents,
            ContentId(0),
            &items(10),
            4,
            &DefaultPaginationUpdater,
        )
        .unwrap();

        let sizes: Vec<usize> = ids
            .iter()
            .map(|id| contents[id.0].pager.as_ref().unwrap().items.len())
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);

        assert_eq!(contents[ids[0].0].url, "/");
        assert_eq!(contents[ids[1].0].url, "/page/2/");
        assert_eq!(contents[ids[2].0].url, "/page/3/");
        assert_eq!(contents[ids[1].0].meta.get_string("title_suffix").unwrap(), " - Part 2");
        assert!(contents[ids[1].0].generated);
    }

    #[test]
    fn test_pager_chain_properties() {
        let dir = TempDir::new().unwrap();
        for (length, size) in [(1, 1), (5, 2), (9, 3), (7, 10), (12, 5)] {
            let mut contents = vec![page(dir.path(), "list.html", json!({}))];
            let ids = paginate(
                &mut contents,
                ContentId(0),
                &items(length),
                size,
                &DefaultPaginationUpdater,
            )
            .unwrap();

            assert_eq!(ids.len(), length.div_ceil(size));
            let pagers: Vec<&Pager> = ids
                .iter()
                .map(|id| contents[id.0].pager.as_ref().unwrap())
                .collect();
            assert_eq!(pagers.iter().map(|pager| pager.items.len()).sum::<usize>(), length);

            for window in pagers.windows(2) {
                assert_eq!(window[0].next, Some(window[1].page));
                assert_eq!(window[1].previous, Some(window[0].page));
            }
            assert_eq!(pagers.last().unwrap().next, None);
            assert_eq!(pagers[0].previous, None);
        }
    }

    #[test]
    fn test_empty_list_yields_no_pagers() {
        let dir = TempDir::new().unwrap();
        let mut contents = vec![page(dir.path(), "index.html", json!({}))];
        let ids = paginate(&mut contents, ContentId(0), &[], 4, &DefaultPaginationUpdater).unwrap();
        assert!(ids.is_empty());
        assert!(contents[0].pager.is_none());
    }

    #[test]
    fn test_file_style_url_and_lookup() {
        let dir = TempDir::new().unwrap();
        let mut contents = vec![page(dir.path(), "archive.html", json!({}))];
        let ids = paginate(
            &mut contents,
            ContentId(0),
            &items(6),
            2,
            &DefaultPaginationUpdater,
        )
        .unwrap();

        assert_eq!(contents[ids[1].0].url, "/archive-p2.html");
        assert_eq!(
            contents[ids[2].0].meta.get_string("title_suffix").unwrap(),
            " - Page 3"
        );
        assert_eq!(page_for(&contents, ids[0], 3), Some(ids[2]));
        assert_eq!(page_for(&contents, ids[2], 1), Some(ids[0]));
        assert_eq!(page_for(&contents, ids[0], 4), None);
    }

    #[test]
    fn test_configurable_updater() {
        let dir = TempDir::new().unwrap();
        let mut contents = vec![page(
            dir.path(),
            "news.html",
            json!({
                "pagination": {
                    "permalink": "${urlWithoutExtension}/${pageNumber}-of-${totalPages}${urlExtension}",
                    "title_suffix_format": " (${pageNumber}/${totalPages})"
                }
            }),
        )];

        let ids = paginate(
            &mut contents,
            ContentId(0),
            &items(3),
            2,
            &ConfigurablePaginationUpdater,
        )
        .unwrap();

        let second = &contents[ids[1].0];
        assert_eq!(second.url, "/news/2-of-2.html");
        assert_eq!(second.meta.get_string("title_suffix").unwrap(), " (2/2)");
    }

    #[test]
    fn test_page_size_resolution() {
        let dir = TempDir::new().unwrap();
        let explicit = page(dir.path(), "a.html", json!({ "paginate": 3 }));
        assert_eq!(PaginationGenerator::page_size(&explicit, Some(9)).unwrap(), 3);

        let nested = page(dir.path(), "b.html", json!({ "pagination": { "size": 4 } }));
        assert_eq!(PaginationGenerator::page_size(&nested, Some(9)).unwrap(), 4);

        let fallback = page(dir.path(), "c.html", json!({ "pagination": {} }));
        assert_eq!(PaginationGenerator::page_size(&fallback, Some(9)).unwrap(), 9);
        assert!(matches!(
            PaginationGenerator::page_size(&fallback, None),
            Err(PressError::MissingPageSize { .. })
        ));
    }
}
