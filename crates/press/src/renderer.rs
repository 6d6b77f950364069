use crate::config::{RenderStrategy, SiteConfig};
use crate::content::Content;
use crate::error::{IoContext, Result};
use crate::highlight::Highlighter;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tera::{Context, Tera};
use tracing::{debug, trace};

const BUILTIN_BASE_TEMPLATE: &str = include_str!("../templates/_base.html");
const BUILTIN_POST_TEMPLATE: &str = include_str!("../templates/_post.html");
const BUILTIN_PAGE_TEMPLATE: &str = include_str!("../templates/_page.html");

const WORK_TEMPLATE_PREFIX: &str = "__work";
const NO_LAYOUT: [&str; 3] = ["nil", "null", "none"];
const TEMPLATE_DELIMITERS: [&str; 3] = ["{{", "{%", "{#"];

pub fn layout_template_name(layout: &str) -> String {
    format!("_{layout}.html")
}

/// Layout present and not one of the reserved no-op names.
pub fn is_valid_layout(layout: Option<&str>) -> bool {
    layout
        .map(str::trim)
        .filter(|layout| !layout.is_empty())
        .map(|layout| {
            !NO_LAYOUT
                .iter()
                .any(|reserved| layout.eq_ignore_ascii_case(reserved))
        })
        .unwrap_or(false)
}

pub fn contains_template_syntax(body: &str) -> bool {
    TEMPLATE_DELIMITERS
        .iter()
        .any(|delimiter| body.contains(delimiter))
}

/// Template engine front: owns the tera instance and the working-template cache.
pub struct Renderer {
    tera: RwLock<Tera>,
    templates_dir: PathBuf,
    work_dir: PathBuf,
    strategy: RenderStrategy,
    require_render_content: bool,
    highlighter: Arc<dyn Highlighter>,
    prepared: Mutex<HashSet<String>>,
}

impl Renderer {
    pub fn new(
        templates_dir: impl AsRef<Path>,
        work_dir: impl AsRef<Path>,
        settings: &SiteConfig,
        highlighter: Arc<dyn Highlighter>,
    ) -> Result<Self> {
        let templates_dir = templates_dir.as_ref().to_path_buf();
        let tera = Self::load(&templates_dir)?;

        Ok(Self {
            tera: RwLock::new(tera),
            templates_dir,
            work_dir: work_dir.as_ref().join("templates"),
            strategy: settings.render_strategy,
            require_render_content: settings.require_render_content,
            highlighter,
            prepared: Mutex::new(HashSet::new()),
        })
    }

    fn load(templates_dir: &Path) -> Result<Tera> {
        let mut tera = if templates_dir.is_dir() {
            let pattern = templates_dir.join("**").join("*");
            Tera::new(&pattern.to_string_lossy())?
        } else {
            debug!(path = %templates_dir.display(), "no templates directory, using built-in layouts");
            Tera::default()
        };

        let builtins = [
            ("_base.html", BUILTIN_BASE_TEMPLATE),
            ("_post.html", BUILTIN_POST_TEMPLATE),
            ("_page.html", BUILTIN_PAGE_TEMPLATE),
        ];
        let missing: Vec<(&str, &str)> = builtins
            .into_iter()
            .filter(|(name, _)| !tera.get_template_names().any(|existing| existing == *name))
            .collect();
        if !missing.is_empty() {
            tera.add_raw_templates(missing)?;
        }

        Ok(tera)
    }

    /// Reloads the templates and forgets which working templates were registered.
    pub fn prepare(&self) -> Result<()> {
        let tera = Self::load(&self.templates_dir)?;
        *self.tera.write() = tera;
        self.prepared.lock().clear();
        Ok(())
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn highlighter(&self) -> &Arc<dyn Highlighter> {
        &self.highlighter
    }

    pub fn is_render_required(&self, content: &Content, converted: &str) -> bool {
        self.require_render_content
            || content.meta.get_bool("render").unwrap_or(false)
            || contains_template_syntax(converted)
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.tera
            .read()
            .get_template_names()
            .any(|existing| existing == name)
    }

    /// Renders `converted` as the final output of `content`.
    pub fn render(&self, content: &Content, converted: &str, context: &Context) -> Result<String> {
        if converted.is_empty() && !is_valid_layout(content.layout.as_deref()) {
            return Ok(String::new());
        }
        if content.meta.get_bool("skip_render").unwrap_or(false) {
            return Ok(converted.to_string());
        }

        let required = self.is_render_required(content, converted);
        let layout = content
            .layout
            .as_deref()
            .filter(|layout| is_valid_layout(Some(layout)));

        match (layout, required, self.strategy) {
            (None, false, _) => Ok(converted.to_string()),
            (None, true, _) => {
                let name = self.ensure_working_template(content, None, converted, "content")?;
                self.render_template(&name, context)
            }
            (Some(layout), false, _) => {
                let mut context = context.clone();
                context.insert("content", converted);
                self.render_template(&layout_template_name(layout), &context)
            }
            (Some(layout), true, RenderStrategy::Merge) => {
                let name =
                    self.ensure_working_template(content, Some(layout), converted, layout)?;
                let mut context = context.clone();
                context.insert("content", "");
                self.render_template(&name, &context)
            }
            (Some(layout), true, RenderStrategy::Recursive) => {
                let name = self.ensure_working_template(content, None, converted, "content")?;
                let body = self.render_template(&name, context)?;
                let mut context = context.clone();
                context.insert("content", &body);
                self.render_template(&layout_template_name(layout), &context)
            }
        }
    }

    /// Runs an extracted excerpt through the templating step when the body needed it.
    pub fn render_excerpt(
        &self,
        content: &Content,
        excerpt: &str,
        body_required_render: bool,
        context: &Context,
    ) -> Result<String> {
        if !body_required_render || excerpt.is_empty() {
            return Ok(excerpt.to_string());
        }
        let name = self.ensure_working_template(content, None, excerpt, "excerpt")?;
        self.render_template(&name, context)
    }

    pub fn has_highlighted(&self, html: &str) -> bool {
        self.highlighter.contains_highlighted(html)
    }

    fn render_template(&self, name: &str, context: &Context) -> Result<String> {
        trace!(template = name, "rendering");
        Ok(self.tera.read().render(name, context)?)
    }

    /// Cache key of a working template: `<source root>/<relative path>.<variant>.html`.
    /// The source root is hashed so equal relative paths under different roots stay apart.
    fn working_template_key(content: &Content, variant: &str) -> String {
        let entry = content.entry();
        let mut hasher = DefaultHasher::new();
        entry.source_dir.hash(&mut hasher);
        format!(
            "{:016x}/{}.{}.html",
            hasher.finish(),
            entry.relative().trim_start_matches('/'),
            variant
        )
    }

    pub fn working_template_file(&self, content: &Content, variant: &str) -> PathBuf {
        self.work_dir.join(Self::working_template_key(content, variant))
    }

    /// Writes (when stale) and registers the working template for `content`.
    fn ensure_working_template(
        &self,
        content: &Content,
        layout: Option<&str>,
        body: &str,
        variant: &str,
    ) -> Result<String> {
        let relative = Self::working_template_key(content, variant);
        let name = format!("{WORK_TEMPLATE_PREFIX}/{relative}");

        let mut prepared = self.prepared.lock();
        if prepared.contains(&name) {
            return Ok(name);
        }

        let file = self.work_dir.join(&relative);
        let layout_file = layout.map(|layout| self.templates_dir.join(layout_template_name(layout)));

        if self.is_cache_current(&file, content.entry().modified, layout_file.as_deref()) {
            debug!(template = %name, "working template cache hit");
        } else {
            let text = match layout {
                Some(layout) => format!(
                    "{{% extends \"{}\" %}}{{% block content %}}{}{{% endblock content %}}",
                    layout_template_name(layout),
                    body
                ),
                None => body.to_string(),
            };
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent).io_context("creating working template directory", parent)?;
            }
            fs::write(&file, text).io_context("writing working template", &file)?;
            debug!(template = %name, path = %file.display(), "working template written");
        }

        self.tera.write().add_template_file(&file, Some(&name))?;
        prepared.insert(name.clone());
        Ok(name)
    }

    fn is_cache_current(&self, file: &Path, source: SystemTime, layout: Option<&Path>) -> bool {
        let Some(cached) = fs::metadata(file).and_then(|metadata| metadata.modified()).ok() else {
            return false;
        };
        let layout_modified = layout
            .and_then(|layout| fs::metadata(layout).and_then(|metadata| metadata.modified()).ok());

        cached >= source && layout_modified.map(|modified| cached >= modified).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::highlight::SyntaxHighlighter;
    use crate::source::{Meta, Source, SourceEntry};
    use serde_json::{Map, Value, json};
    use tempfile::TempDir;

    fn content(dir: &Path, name: &str, meta: Value, body: &str) -> Content {
        content_in(dir, "pages", name, meta, body)
    }

    fn content_in(dir: &Path, root: &str, name: &str, meta: Value, body: &str) -> Content {
        let sources = dir.join(root);
        fs::create_dir_all(&sources).unwrap();
        let file = sources.join(name);
        fs::write(&file, body).unwrap();
        let config = Config::from_values(dir, Map::new());
        let source = Source {
            entry: SourceEntry::new(&sources, &file).unwrap(),
            meta: Meta {
                raw: meta.as_object().cloned().unwrap_or_default(),
            },
            body: body.to_string(),
        };
        Content::from_source(source, ".html", &config, &config.site().unwrap()).unwrap()
    }

    fn renderer(dir: &Path, strategy: RenderStrategy) -> Renderer {
        let templates = dir.join("templates");
        fs::create_dir_all(&templates).unwrap();
        fs::write(
            templates.join("_plain.html"),
            "<main>{% block content %}{{ content | safe }}{% endblock content %}</main>",
        )
        .unwrap();

        let settings = SiteConfig {
            render_strategy: strategy,
            ..SiteConfig::default()
        };
        Renderer::new(&templates, dir.join("work"), &settings, Arc::new(SyntaxHighlighter)).unwrap()
    }

    fn context() -> Context {
        let mut context = Context::new();
        context.insert("site", &json!({ "title": "Demo" }));
        context
    }

    #[test]
    fn test_layout_predicates() {
        assert!(is_valid_layout(Some("post")));
        assert!(!is_valid_layout(Some("NIL")));
        assert!(!is_valid_layout(Some("none")));
        assert!(!is_valid_layout(Some("")));
        assert!(!is_valid_layout(None));
        assert!(contains_template_syntax("a {{ b }}"));
        assert!(contains_template_syntax("{# note #}"));
        assert!(!contains_template_syntax("plain { text }"));
    }

    #[test]
    fn test_merge_strategy_renders_in_one_pass() {
        let dir = TempDir::new().unwrap();
        let renderer = renderer(dir.path(), RenderStrategy::Merge);
        let page = content(dir.path(), "a.html", json!({ "layout": "plain" }), "x");

        let output = renderer
            .render(&page, "<p>{{ site.title }}</p>", &context())
            .unwrap();
        assert_eq!(output, "<main><p>Demo</p></main>");
        assert!(renderer.working_template_file(&page, "plain").is_file());
    }

    #[test]
    fn test_recursive_strategy() {
        let dir = TempDir::new().unwrap();
        let renderer = renderer(dir.path(), RenderStrategy::Recursive);
        let page = content(dir.path(), "a.html", json!({ "layout": "plain" }), "x");

        let output = renderer
            .render(&page, "<p>{{ site.title }}</p>", &context())
            .unwrap();
        assert_eq!(output, "<main><p>Demo</p></main>");
        assert!(renderer.working_template_file(&page, "content").is_file());
    }

    #[test]
    fn test_layout_without_template_syntax() {
        let dir = TempDir::new().unwrap();
        let renderer = renderer(dir.path(), RenderStrategy::Merge);
        let page = content(dir.path(), "a.html", json!({ "layout": "plain" }), "x");

        let output = renderer.render(&page, "<p>a & b</p>", &context()).unwrap();
        assert_eq!(output, "<main><p>a & b</p></main>");
        assert!(!dir.path().join("work/templates").exists());
    }

    #[test]
    fn test_pass_through_and_skip() {
        let dir = TempDir::new().unwrap();
        let renderer = renderer(dir.path(), RenderStrategy::Merge);

        let plain = content(dir.path(), "a.xml", json!({}), "x");
        assert_eq!(renderer.render(&plain, "<x/>", &context()).unwrap(), "<x/>");

        let skipped = content(
            dir.path(),
            "b.html",
            json!({ "layout": "plain", "skip_render": true }),
            "x",
        );
        assert_eq!(
            renderer.render(&skipped, "{{ raw }}", &context()).unwrap(),
            "{{ raw }}"
        );

        let forced = content(dir.path(), "c.html", json!({ "render": true }), "x");
        assert!(renderer.is_render_required(&forced, "plain"));
    }

    #[test]
    fn test_working_template_cache_reused() {
        let dir = TempDir::new().unwrap();
        let renderer = renderer(dir.path(), RenderStrategy::Merge);
        let page = content(dir.path(), "a.html", json!({ "layout": "plain" }), "x");

        renderer.render(&page, "{{ site.title }}", &context()).unwrap();
        let cache = renderer.working_template_file(&page, "plain");
        let first = fs::metadata(&cache).unwrap().modified().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        renderer.prepare().unwrap();
        let output = renderer.render(&page, "{{ site.title }}", &context()).unwrap();

        assert_eq!(output, "<main>Demo</main>");
        assert_eq!(fs::metadata(&cache).unwrap().modified().unwrap(), first);
    }

    #[test]
    fn test_working_templates_keyed_by_source_root() {
        let dir = TempDir::new().unwrap();
        let renderer = renderer(dir.path(), RenderStrategy::Merge);
        let site_page = content_in(dir.path(), "pages", "a.html", json!({ "layout": "plain" }), "x");
        let theme_page = content_in(dir.path(), "theme/pages", "a.html", json!({ "layout": "plain" }), "x");

        let first = renderer.render(&site_page, "site {{ site.title }}", &context()).unwrap();
        let second = renderer.render(&theme_page, "theme {{ site.title }}", &context()).unwrap();

        assert_eq!(first, "<main>site Demo</main>");
        assert_eq!(second, "<main>theme Demo</main>");
        assert_ne!(
            renderer.working_template_file(&site_page, "plain"),
            renderer.working_template_file(&theme_page, "plain")
        );
    }

    #[test]
    fn test_builtin_layouts_available() {
        let dir = TempDir::new().unwrap();
        let renderer = Renderer::new(
            dir.path().join("missing"),
            dir.path().join("work"),
            &SiteConfig::default(),
            Arc::new(SyntaxHighlighter),
        )
        .unwrap();
        assert!(renderer.has_template("_post.html"));
        assert!(renderer.has_template("_page.html"));
    }
}
