use crate::content::{Content, ContentId};
use crate::pagination::Pager;
use crate::site::Site;
use crate::taxonomy::{CategoryId, MetaTagRef, TagId, Taxonomy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tera::Context;

#[derive(Debug, Clone, Serialize)]
pub struct Link {
    pub title: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetaTagView {
    pub kind: &'static str,
    pub slug: String,
    pub name: String,
    pub url: String,
    pub count: usize,
    pub path: Option<String>,
    pub title: Option<String>,
}

impl MetaTagView {
    pub fn tag(taxonomy: &Taxonomy, id: TagId) -> Self {
        let tag = taxonomy.tag(id);
        Self {
            kind: "tag",
            slug: tag.slug.clone(),
            name: tag.name.clone(),
            url: tag.url.clone(),
            count: tag.pages.len(),
            path: None,
            title: None,
        }
    }

    pub fn category(taxonomy: &Taxonomy, id: CategoryId) -> Self {
        let category = taxonomy.category(id);
        Self {
            kind: "category",
            slug: category.slug.clone(),
            name: category.name.clone(),
            url: category.url.clone(),
            count: category.pages.len(),
            path: Some(category.path.clone()),
            title: Some(category.title.clone()),
        }
    }

    pub fn from_ref(taxonomy: &Taxonomy, meta_tag: MetaTagRef) -> Self {
        match meta_tag {
            MetaTagRef::Tag(id) => Self::tag(taxonomy, id),
            MetaTagRef::Category(id) => Self::category(taxonomy, id),
        }
    }
}

/// What listings and related-post blocks show about a post.
#[derive(Debug, Clone, Serialize)]
pub struct PostSummary {
    pub title: Option<String>,
    pub url: String,
    pub date: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub excerpt: String,
    pub tags: Vec<MetaTagView>,
    pub categories: Vec<MetaTagView>,
}

impl PostSummary {
    pub fn new(site: &Site, id: ContentId) -> Self {
        let content = &site.contents[id.0];
        Self {
            title: content.title.clone(),
            url: content.url.clone(),
            date: content.date,
            updated: content.updated,
            excerpt: content
                .post_data()
                .and_then(|data| data.converted_excerpt.clone())
                .unwrap_or_default(),
            tags: content
                .tags
                .values()
                .map(|tag| MetaTagView::tag(&site.taxonomy, *tag))
                .collect(),
            categories: content
                .categories
                .values()
                .map(|category| MetaTagView::category(&site.taxonomy, *category))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PagerView {
    pub page_number: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub page_size: usize,
    pub items: Vec<PostSummary>,
    pub next_url: Option<String>,
    pub previous_url: Option<String>,
}

impl PagerView {
    pub fn new(site: &Site, pager: &Pager) -> Self {
        let url = |id: Option<ContentId>| id.map(|id| site.contents[id.0].url.clone());
        Self {
            page_number: pager.page_number,
            total_pages: pager.total_pages,
            total_items: pager.total_items,
            page_size: pager.page_size,
            items: pager
                .items
                .iter()
                .map(|id| PostSummary::new(site, *id))
                .collect(),
            next_url: url(pager.next),
            previous_url: url(pager.previous),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteView {
    pub title: String,
    pub root: String,
    pub time: DateTime<Utc>,
    pub config: Map<String, Value>,
    pub posts: Vec<PostSummary>,
    pub pages: Vec<Link>,
    pub tags: Vec<MetaTagView>,
    pub categories: Vec<MetaTagView>,
}

impl SiteView {
    pub fn new(site: &Site) -> Self {
        let settings = site.settings();
        Self {
            title: settings.title.clone(),
            root: settings.root.trim_end_matches('/').to_string(),
            time: Utc::now(),
            config: site.config().values(),
            posts: site
                .posts
                .iter()
                .map(|id| PostSummary::new(site, *id))
                .collect(),
            pages: site
                .pages
                .iter()
                .map(|id| &site.contents[id.0])
                .filter(|content| !content.generated)
                .map(|content| Link {
                    title: content.title.clone(),
                    url: content.url.clone(),
                })
                .collect(),
            tags: site
                .tags
                .values()
                .map(|tag| MetaTagView::tag(&site.taxonomy, *tag))
                .collect(),
            categories: site
                .categories
                .values()
                .map(|category| MetaTagView::category(&site.taxonomy, *category))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct PageView {
    title: Option<String>,
    title_suffix: String,
    url: String,
    layout: Option<String>,
    date: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
    published: bool,
    is_post: bool,
    excerpt: Option<String>,
    tags: Vec<MetaTagView>,
    categories: Vec<MetaTagView>,
    next: Option<Link>,
    previous: Option<Link>,
    related_posts: Vec<PostSummary>,
    meta_tag: Option<MetaTagView>,
}

fn link(site: &Site, id: Option<ContentId>) -> Option<Link> {
    id.map(|id| {
        let content = &site.contents[id.0];
        Link {
            title: content.title.clone(),
            url: content.url.clone(),
        }
    })
}

/// Front matter merged under the engine-computed page fields.
pub fn page_value(site: &Site, id: ContentId) -> Value {
    let content: &Content = &site.contents[id.0];
    let view = PageView {
        title: content.title.clone(),
        title_suffix: content.meta.get_string("title_suffix").unwrap_or_default(),
        url: content.url.clone(),
        layout: content.layout.clone(),
        date: content.date,
        updated: content.updated,
        published: content.published,
        is_post: content.is_post(),
        excerpt: content
            .post_data()
            .and_then(|data| data.converted_excerpt.clone()),
        tags: content
            .tags
            .values()
            .map(|tag| MetaTagView::tag(&site.taxonomy, *tag))
            .collect(),
        categories: content
            .categories
            .values()
            .map(|category| MetaTagView::category(&site.taxonomy, *category))
            .collect(),
        next: link(site, content.next),
        previous: link(site, content.previous),
        related_posts: content
            .related_posts
            .iter()
            .map(|id| PostSummary::new(site, *id))
            .collect(),
        meta_tag: content
            .meta_tag
            .map(|meta_tag| MetaTagView::from_ref(&site.taxonomy, meta_tag)),
    };

    let mut page = content.meta.raw.clone();
    if let Ok(Value::Object(computed)) = serde_json::to_value(view) {
        page.extend(computed);
    }
    Value::Object(page)
}

/// Template context for one content unit.
pub fn context(site_view: &Value, site: &Site, id: ContentId, highlighter: Option<&str>) -> Context {
    let content = &site.contents[id.0];
    let mut context = Context::new();
    context.insert("site", site_view);
    context.insert("page", &page_value(site, id));
    match &content.pager {
        Some(pager) => context.insert("pager", &PagerView::new(site, pager)),
        None => context.insert("pager", &Value::Null),
    }
    match highlighter {
        Some(name) => context.insert("highlighter", name),
        None => context.insert("highlighter", &false),
    }
    context
}
