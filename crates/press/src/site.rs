use crate::collection::Collection;
use crate::config::{Config, SiteConfig};
use crate::content::{
    Content, ContentId, ListHolder, StaticFile, link_siblings, sort_by_date,
};
use crate::error::{IoContext, PressError, Result};
use crate::executor::Executor;
use crate::highlight::highlighter_for;
use crate::links::{DefaultSlugHelper, SlugHelper, expand_template};
use crate::registry::{ExtensionContext, ExtensionFactory, Registry, Stage};
use crate::renderer::Renderer;
use crate::source::{FileFilter, FrontMatterParser, Parsed, Source, SourceEntry, SourceParser, scan};
use crate::stale::{BuildRecord, StalenessCheck, changed_files, load_record, save_record};
use crate::taxonomy::{CategoryId, TagId, Taxonomy};
use crate::theme::Theme;
use crate::view::{SiteView, context};
use chrono::Utc;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewContentKind {
    Post,
    Page,
}

pub struct SiteBuilder {
    base_dir: PathBuf,
    overrides: Map<String, Value>,
    show_drafts: Option<bool>,
    factory: ExtensionFactory,
    slug_helper: Arc<dyn SlugHelper>,
    parser: Arc<dyn SourceParser>,
}

impl SiteBuilder {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            overrides: Map::new(),
            show_drafts: None,
            factory: ExtensionFactory::builtin(),
            slug_helper: Arc::new(DefaultSlugHelper),
            parser: Arc::new(FrontMatterParser),
        }
    }

    pub fn show_drafts(mut self, show: bool) -> Self {
        self.show_drafts = Some(show);
        self
    }

    /// Override applied between the defaults and the config files.
    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.overrides.insert(key.into(), value);
        self
    }

    pub fn extensions(mut self, factory: ExtensionFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn slug_helper(mut self, helper: Arc<dyn SlugHelper>) -> Self {
        self.slug_helper = helper;
        self
    }

    pub fn parser(mut self, parser: Arc<dyn SourceParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn build(self) -> Result<Site> {
        let mut config = Config::load(&self.base_dir, self.overrides)?;
        if let Some(show) = self.show_drafts {
            config.set("show_drafts", Value::Bool(show));
        }

        let theme = Theme::resolve(&config, &config.site()?)?;
        config.set_fallback(theme.values.clone());
        let settings = config.site()?;

        let base_dir = self.base_dir;
        let mut source_dirs: Vec<PathBuf> = settings
            .source_dirs
            .iter()
            .map(|dir| base_dir.join(dir))
            .collect();
        source_dirs.extend(theme.source.clone());
        let mut asset_dirs: Vec<PathBuf> = settings
            .asset_dirs
            .iter()
            .map(|dir| base_dir.join(dir))
            .collect();
        asset_dirs.extend(theme.assets.clone());

        let dest_dir = base_dir.join(&settings.dest_dir);
        let work_dir = base_dir.join(&settings.work_dir);

        let highlighter = highlighter_for(&settings.highlighter)?;
        let registry = self.factory.create(&ExtensionContext {
            settings: &settings,
            highlighter: Arc::clone(&highlighter),
        })?;
        let renderer = Renderer::new(&theme.templates, &work_dir, &settings, highlighter)?;
        let executor = Executor::new(settings.threads)?;
        let filter = FileFilter::new(settings.includes.clone(), settings.excludes.clone());

        info!(
            base = %base_dir.display(),
            theme = %theme.name,
            threads = executor.threads(),
            "site initialized"
        );

        Ok(Site {
            config,
            settings,
            theme,
            base_dir,
            dest_dir,
            work_dir,
            source_dirs,
            asset_dirs,
            registry: Arc::new(registry),
            renderer,
            executor,
            parser: self.parser,
            slug_helper: self.slug_helper,
            filter,
            setup_done: false,
            contents: Vec::new(),
            pages: Vec::new(),
            posts: Vec::new(),
            static_files: Vec::new(),
            taxonomy: Taxonomy::default(),
            collections: Vec::new(),
            tags: ListHolder::default(),
            categories: ListHolder::default(),
            template_pages: Vec::new(),
        })
    }
}

/// The build context: configuration, extensions and the in-memory site graph.
pub struct Site {
    config: Config,
    settings: SiteConfig,
    theme: Theme,
    base_dir: PathBuf,
    dest_dir: PathBuf,
    work_dir: PathBuf,
    source_dirs: Vec<PathBuf>,
    asset_dirs: Vec<PathBuf>,
    registry: Arc<Registry>,
    renderer: Renderer,
    executor: Executor,
    parser: Arc<dyn SourceParser>,
    slug_helper: Arc<dyn SlugHelper>,
    filter: FileFilter,
    setup_done: bool,

    pub contents: Vec<Content>,
    pub pages: Vec<ContentId>,
    pub posts: Vec<ContentId>,
    pub static_files: Vec<StaticFile>,
    pub taxonomy: Taxonomy,
    pub collections: Vec<Collection>,
    /// Tags and categories of the `post` collection.
    pub tags: ListHolder<TagId>,
    pub categories: ListHolder<CategoryId>,
    /// Listing templates to drop once generation is done.
    pub template_pages: Vec<ContentId>,
}

impl Site {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn settings(&self) -> &SiteConfig {
        &self.settings
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn source_dirs(&self) -> &[PathBuf] {
        &self.source_dirs
    }

    pub fn asset_dirs(&self) -> &[PathBuf] {
        &self.asset_dirs
    }

    pub fn templates_dir(&self) -> &Path {
        &self.theme.templates
    }

    pub fn show_drafts(&self) -> bool {
        self.settings.show_drafts
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        Arc::make_mut(&mut self.registry)
    }

    pub fn slug_helper(&self) -> Arc<dyn SlugHelper> {
        Arc::clone(&self.slug_helper)
    }

    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections
            .iter()
            .find(|collection| collection.name == name)
    }

    /// Site and theme config files, in the order they were loaded.
    pub fn config_files(&self) -> Vec<PathBuf> {
        let mut files = self.config.files().to_vec();
        files.extend(self.theme.config_file.clone());
        files
    }

    fn process(&mut self, stage: Stage) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        for processor in registry.processors() {
            debug!(processor = processor.name(), stage = stage.name(), "processor");
            processor.process(stage, self)?;
        }
        Ok(())
    }

    fn stage<T>(&mut self, name: &'static str, work: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let started = Instant::now();
        debug!(stage = name, "stage started");
        match work(self) {
            Ok(value) => {
                info!(stage = name, elapsed_ms = started.elapsed().as_millis() as u64, "stage finished");
                Ok(value)
            }
            Err(source) => Err(PressError::Stage {
                stage: name,
                elapsed: started.elapsed(),
                source: Box::new(source),
            }),
        }
    }

    pub fn setup(&mut self) -> Result<()> {
        if self.setup_done {
            return Ok(());
        }
        fs::create_dir_all(&self.work_dir).io_context("creating work directory", &self.work_dir)?;
        self.process(Stage::Setup)?;
        self.setup_done = true;
        Ok(())
    }

    /// Drops everything the previous build derived.
    pub fn reset(&mut self) -> Result<()> {
        self.contents.clear();
        self.pages.clear();
        self.posts.clear();
        self.static_files.clear();
        self.taxonomy = Taxonomy::default();
        self.collections.clear();
        self.tags.clear();
        self.categories.clear();
        self.template_pages.clear();
        self.process(Stage::Reset)
    }

    pub fn read(&mut self) -> Result<()> {
        let static_files = Mutex::new(Vec::new());
        let parser = &self.parser;
        let filter = &self.filter;
        let source_dirs = &self.source_dirs;
        let asset_dirs = &self.asset_dirs;
        let executor = &self.executor;

        let (sources, assets) = executor.join(
            || -> Result<Vec<Source>> {
                let mut entries = Vec::new();
                for dir in source_dirs {
                    entries.extend(scan(dir, filter)?);
                }
                let parsed = entries
                    .into_par_iter()
                    .map(|entry| parser.parse(entry))
                    .collect::<Result<Vec<Parsed>>>()?;

                let mut sources = Vec::with_capacity(parsed.len());
                for item in parsed {
                    match item {
                        Parsed::Content(source) => sources.push(source),
                        Parsed::Opaque(entry) => static_files.lock().push(StaticFile::new(entry)),
                    }
                }
                Ok(sources)
            },
            || -> Result<()> {
                for dir in asset_dirs {
                    for entry in scan(dir, filter)? {
                        static_files.lock().push(StaticFile::new(entry));
                    }
                }
                Ok(())
            },
        );
        let sources = sources?;
        assets?;

        let mut static_files = static_files.into_inner();
        static_files.sort_by(|a, b| a.entry.relative().cmp(&b.entry.relative()));
        self.static_files = static_files;

        for source in sources {
            if !self.settings.show_drafts && source.meta.get_bool("published") == Some(false) {
                debug!(path = %source.entry.file.display(), "skipping draft");
                continue;
            }
            let converter = self.registry.converter_for(&source)?;
            let extension = converter.output_extension(&source);
            let content = Content::from_source(source, &extension, &self.config, &self.settings)?;

            let id = ContentId(self.contents.len());
            if content.is_post() {
                self.posts.push(id);
            } else {
                self.pages.push(id);
            }
            self.contents.push(content);
        }

        sort_by_date(&mut self.posts, &self.contents);
        link_siblings(&self.posts, &mut self.contents);

        info!(
            pages = self.pages.len(),
            posts = self.posts.len(),
            static_files = self.static_files.len(),
            "sources read"
        );
        self.process(Stage::Read)
    }

    pub fn generate(&mut self) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        for generator in registry.generators() {
            debug!(generator = generator.name(), "running generator");
            generator.generate(self)?;
        }
        self.process(Stage::Generate)
    }

    pub fn render(&mut self) -> Result<()> {
        self.renderer.prepare()?;
        self.process(Stage::PreRender)?;

        let posts = self.posts.clone();
        self.convert_batch(&posts)?;
        self.render_batch(&posts)?;

        let pages = self.pages.clone();
        self.convert_batch(&pages)?;
        self.render_batch(&pages)?;

        info!(posts = posts.len(), pages = pages.len(), "rendered");
        self.process(Stage::Render)
    }

    fn convert_batch(&mut self, ids: &[ContentId]) -> Result<()> {
        let this = &*self;
        let converted = this.executor.install(|| {
            ids.par_iter()
                .map(|id| {
                    let content = &this.contents[id.0];
                    let converter = this.registry.converter_for(&content.source)?;
                    let body = converter.convert(&content.body)?;
                    let excerpt = match content.post_data() {
                        Some(data) if data.excerpt_extracted => Some(converter.convert(&data.excerpt)?),
                        Some(data) if content.meta.contains_key("excerpt") => Some(data.excerpt.clone()),
                        Some(_) => Some(body.clone()),
                        None => None,
                    };
                    Ok((*id, body, excerpt))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        for (id, body, excerpt) in converted {
            let content = &mut self.contents[id.0];
            content.converted = Some(body);
            if let Some(data) = content.post_data_mut() {
                data.converted_excerpt = excerpt;
            }
        }
        Ok(())
    }

    fn render_batch(&mut self, ids: &[ContentId]) -> Result<()> {
        let site_view = serde_json::to_value(SiteView::new(self)).map_err(|error| {
            PressError::InvalidConfig {
                key: "site".to_string(),
                message: error.to_string(),
            }
        })?;

        let this = &*self;
        let rendered = this.executor.install(|| {
            ids.par_iter()
                .map(|id| this.render_one(*id, &site_view))
                .collect::<Result<Vec<_>>>()
        })?;

        for (id, output, excerpt) in rendered {
            let content = &mut self.contents[id.0];
            content.rendered = Some(output);
            if let (Some(excerpt), Some(data)) = (excerpt, content.post_data_mut()) {
                data.converted_excerpt = Some(excerpt);
            }
        }
        Ok(())
    }

    fn render_one(&self, id: ContentId, site_view: &Value) -> Result<(ContentId, String, Option<String>)> {
        let content = &self.contents[id.0];
        let converted = content.converted.as_deref().unwrap_or(&content.body);
        let required = self.renderer.is_render_required(content, converted);

        let highlighted = content.output_extension == ".html"
            && (self.renderer.has_highlighted(converted)
                || content.pager.as_ref().is_some_and(|pager| {
                    pager.items.iter().any(|item| {
                        self.contents[item.0]
                            .post_data()
                            .and_then(|data| data.converted_excerpt.as_deref())
                            .is_some_and(|excerpt| self.renderer.has_highlighted(excerpt))
                    })
                }));
        let highlighter = highlighted.then(|| self.renderer.highlighter().name());

        let context = context(site_view, self, id, highlighter);
        let output = self.renderer.render(content, converted, &context)?;

        // Explicit excerpt meta is used verbatim.
        let excerpt = match content.post_data() {
            Some(_) if content.meta.contains_key("excerpt") => None,
            Some(data) => match &data.converted_excerpt {
                Some(excerpt) => Some(self.renderer.render_excerpt(content, excerpt, required, &context)?),
                None => None,
            },
            None => None,
        };

        Ok((id, output, excerpt))
    }

    fn output_targets(&self) -> HashSet<PathBuf> {
        let mut targets: HashSet<PathBuf> = self
            .posts
            .iter()
            .chain(self.pages.iter())
            .map(|id| self.contents[id.0].output_file(&self.dest_dir))
            .collect();
        targets.extend(
            self.static_files
                .iter()
                .map(|file| file.output_file(&self.dest_dir)),
        );
        targets
    }

    /// Deletes destination files that this build will not write.
    pub fn cleanup(&mut self) -> Result<()> {
        if self.dest_dir.is_dir() {
            let targets = self.output_targets();
            let obsolete: Vec<PathBuf> = WalkDir::new(&self.dest_dir)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| !targets.contains(path))
                .collect();

            self.executor.install(|| {
                obsolete
                    .par_iter()
                    .map(|path| {
                        debug!(path = %path.display(), "removing obsolete output");
                        fs::remove_file(path).io_context("removing obsolete output", path)
                    })
                    .collect::<Result<Vec<()>>>()
            })?;
            if !obsolete.is_empty() {
                info!(count = obsolete.len(), "obsolete files removed");
            }
        }
        self.process(Stage::Cleanup)
    }

    pub fn write(&mut self) -> Result<()> {
        let dest = &self.dest_dir;
        let contents = &self.contents;
        let ids: Vec<ContentId> = self.posts.iter().chain(self.pages.iter()).copied().collect();
        let static_files = &self.static_files;

        let (written, copied) = self.executor.join(
            || {
                ids.par_iter()
                    .map(|id| contents[id.0].write(dest))
                    .collect::<Result<Vec<PathBuf>>>()
            },
            || {
                static_files
                    .par_iter()
                    .map(|file| file.write(dest))
                    .collect::<Result<Vec<bool>>>()
            },
        );
        let written = written?;
        let copied = copied?.into_iter().filter(|copied| *copied).count();

        info!(written = written.len(), copied, dest = %dest.display(), "output written");
        self.process(Stage::Write)
    }

    pub fn is_stale(&self) -> bool {
        let config_files = self.config_files();
        let mut watched = self.source_dirs.clone();
        watched.push(self.theme.templates.clone());

        StalenessCheck {
            config_files: &config_files,
            show_drafts: self.settings.show_drafts,
            watched_dirs: &watched,
        }
        .is_stale(load_record(&self.work_dir).as_ref())
    }

    /// Copies asset files changed since the last build. Returns how many were copied.
    pub fn copy_changed_assets(&self) -> Result<usize> {
        let since = load_record(&self.work_dir)
            .map(|record| record.time())
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut copied = 0;
        for dir in &self.asset_dirs {
            for file in changed_files(dir, since) {
                let name = file
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !self.filter.accepts(&name) {
                    continue;
                }
                if StaticFile::new(SourceEntry::new(dir, &file)?).write(&self.dest_dir)? {
                    copied += 1;
                }
            }
        }
        Ok(copied)
    }

    /// Full build unless `force` is false and nothing changed since the last record.
    pub fn build(&mut self, force: bool) -> Result<()> {
        if !force && !self.is_stale() {
            let copied = self.copy_changed_assets()?;
            info!(copied, "site is up to date");
            return Ok(());
        }

        let started = Instant::now();
        let build_time = SystemTime::now();

        self.stage("setup", Self::setup)?;
        self.stage("reset", Self::reset)?;
        self.stage("read", Self::read)?;
        self.stage("generate", Self::generate)?;
        self.stage("render", Self::render)?;
        self.stage("cleanup", Self::cleanup)?;
        self.stage("write", Self::write)?;

        let record = BuildRecord::new(build_time, self.settings.show_drafts, self.config_files().len());
        save_record(&self.work_dir, &record)?;

        info!(
            pages = self.pages.len(),
            posts = self.posts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "build complete"
        );
        Ok(())
    }

    /// Removes the destination and working directories.
    pub fn clean(&self) -> Result<()> {
        for dir in [&self.dest_dir, &self.work_dir] {
            if dir.exists() {
                fs::remove_dir_all(dir).io_context("removing", dir)?;
                info!(path = %dir.display(), "removed");
            }
        }
        Ok(())
    }

    /// Writes a new source file from the `new_post` or `new_page` template.
    pub fn new_content(
        &self,
        kind: NewContentKind,
        title: &str,
        name: Option<&str>,
        format: &str,
    ) -> Result<PathBuf> {
        let now = Utc::now();
        let name = match name {
            Some(name) => name.to_string(),
            None => self.slug_helper.to_slug(title)?,
        };
        let name = name
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
            .to_lowercase();

        let mut params = Map::new();
        for (key, pattern) in [("year", "%Y"), ("month", "%m"), ("day", "%d")] {
            params.insert(key.to_string(), Value::from(now.format(pattern).to_string()));
        }
        params.insert("name".to_string(), Value::from(name));
        params.insert("format".to_string(), Value::from(format));

        let template = match kind {
            NewContentKind::Post => &self.settings.new_post,
            NewContentKind::Page => &self.settings.new_page,
        };
        let path = self.base_dir.join(expand_template(template, &params)?);
        if path.exists() {
            return Err(PressError::AlreadyExists { path });
        }

        let mut meta = Map::new();
        if kind == NewContentKind::Post {
            meta.insert("layout".to_string(), Value::from("post"));
        }
        meta.insert("title".to_string(), Value::from(title));
        if kind == NewContentKind::Post {
            meta.insert(
                "date".to_string(),
                Value::from(now.format("%Y-%m-%d %H:%M").to_string()),
            );
        }
        let front_matter = serde_yml::to_string(&meta).map_err(|error| PressError::YamlParse {
            path: path.clone(),
            message: error.to_string(),
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).io_context("creating directory", parent)?;
        }
        fs::write(&path, format!("---\n{front_matter}---\n\n")).io_context("writing new content", &path)?;
        info!(path = %path.display(), "content created");
        Ok(path)
    }
}
