use crate::collection::CollectionProcessor;
use crate::config::SiteConfig;
use crate::converter::{IdentityConverter, MarkdownConverter};
use crate::error::{PressError, Result};
use crate::highlight::Highlighter;
use crate::listing::MetaTagPageGenerator;
use crate::pagination::PaginationGenerator;
use crate::related::RelatedPostsProcessor;
use crate::site::Site;
use crate::source::Source;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Pipeline points at which processors are called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Setup,
    Reset,
    /// After sources are read and posts linked.
    Read,
    /// After every generator ran.
    Generate,
    /// Before the render batches start.
    PreRender,
    Render,
    Cleanup,
    Write,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::Reset => "reset",
            Stage::Read => "read",
            Stage::Generate => "generate",
            Stage::PreRender => "pre_render",
            Stage::Render => "render",
            Stage::Cleanup => "cleanup",
            Stage::Write => "write",
        }
    }
}

pub trait Converter: Send + Sync {
    fn name(&self) -> &str;

    fn order(&self) -> i32 {
        0
    }

    fn matches(&self, source: &Source) -> bool;

    fn convert(&self, body: &str) -> Result<String>;

    fn output_extension(&self, source: &Source) -> String;
}

pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    fn order(&self) -> i32 {
        0
    }

    fn generate(&self, site: &mut Site) -> Result<()>;
}

pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    fn order(&self) -> i32 {
        0
    }

    fn process(&self, stage: Stage, site: &mut Site) -> Result<()>;
}

/// What extension constructors may depend on.
pub struct ExtensionContext<'a> {
    pub settings: &'a SiteConfig,
    pub highlighter: Arc<dyn Highlighter>,
}

pub type ConverterFactory = fn(&ExtensionContext) -> Arc<dyn Converter>;
pub type GeneratorFactory = fn(&ExtensionContext) -> Arc<dyn Generator>;
pub type ProcessorFactory = fn(&ExtensionContext) -> Arc<dyn Processor>;

/// Maps extension names used in configuration to their constructors.
#[derive(Clone)]
pub struct ExtensionFactory {
    converters: HashMap<String, ConverterFactory>,
    generators: HashMap<String, GeneratorFactory>,
    processors: HashMap<String, ProcessorFactory>,
}

impl ExtensionFactory {
    pub fn builtin() -> Self {
        let mut factory = Self {
            converters: HashMap::new(),
            generators: HashMap::new(),
            processors: HashMap::new(),
        };
        factory.add_converter("markdown", |context| {
            Arc::new(MarkdownConverter::new(Arc::clone(&context.highlighter)))
        });
        factory.add_converter("identity", |_| Arc::new(IdentityConverter));
        factory.add_generator("pagination", |_| Arc::new(PaginationGenerator));
        factory.add_generator("meta_tag_pages", |_| Arc::new(MetaTagPageGenerator));
        factory.add_processor("collections", |_| Arc::new(CollectionProcessor));
        factory.add_processor("related_posts", |_| Arc::new(RelatedPostsProcessor));
        factory
    }

    pub fn add_converter(&mut self, name: &str, factory: ConverterFactory) {
        self.converters.insert(name.to_string(), factory);
    }

    pub fn add_generator(&mut self, name: &str, factory: GeneratorFactory) {
        self.generators.insert(name.to_string(), factory);
    }

    pub fn add_processor(&mut self, name: &str, factory: ProcessorFactory) {
        self.processors.insert(name.to_string(), factory);
    }

    /// Instantiates the extensions listed in `converters`, `generators` and `processors`.
    pub fn create(&self, context: &ExtensionContext) -> Result<Registry> {
        let mut registry = Registry::default();

        for name in &context.settings.converters {
            let factory = self.converters.get(name).ok_or_else(|| unknown("converter", name))?;
            registry.converters.push(factory(context));
        }
        for name in &context.settings.generators {
            let factory = self.generators.get(name).ok_or_else(|| unknown("generator", name))?;
            registry.generators.push(factory(context));
        }
        for name in &context.settings.processors {
            let factory = self.processors.get(name).ok_or_else(|| unknown("processor", name))?;
            registry.processors.push(factory(context));
        }

        registry.sort();
        debug!(
            converters = registry.converters.len(),
            generators = registry.generators.len(),
            processors = registry.processors.len(),
            "extensions registered"
        );
        Ok(registry)
    }
}

impl Default for ExtensionFactory {
    fn default() -> Self {
        Self::builtin()
    }
}

fn unknown(kind: &'static str, name: &str) -> PressError {
    PressError::UnknownExtension {
        kind,
        name: name.to_string(),
    }
}

/// Converters, generators and processors, each kept in ascending `order()`.
#[derive(Clone, Default)]
pub struct Registry {
    converters: Vec<Arc<dyn Converter>>,
    generators: Vec<Arc<dyn Generator>>,
    processors: Vec<Arc<dyn Processor>>,
}

impl Registry {
    fn sort(&mut self) {
        // stable: equal orders keep registration order
        self.converters.sort_by_key(|converter| converter.order());
        self.generators.sort_by_key(|generator| generator.order());
        self.processors.sort_by_key(|processor| processor.order());
    }

    pub fn register_converter(&mut self, converter: Arc<dyn Converter>) {
        self.converters.push(converter);
        self.sort();
    }

    pub fn register_generator(&mut self, generator: Arc<dyn Generator>) {
        self.generators.push(generator);
        self.sort();
    }

    pub fn register_processor(&mut self, processor: Arc<dyn Processor>) {
        self.processors.push(processor);
        self.sort();
    }

    pub fn converters(&self) -> &[Arc<dyn Converter>] {
        &self.converters
    }

    pub fn generators(&self) -> &[Arc<dyn Generator>] {
        &self.generators
    }

    pub fn processors(&self) -> &[Arc<dyn Processor>] {
        &self.processors
    }

    /// First converter, in order, that accepts `source`.
    pub fn converter_for(&self, source: &Source) -> Result<&Arc<dyn Converter>> {
        self.converters
            .iter()
            .find(|converter| converter.matches(source))
            .ok_or_else(|| PressError::NoConverter {
                path: source.entry.file.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::highlight::SyntectHighlighter;
    use crate::source::{Meta, SourceEntry};
    use std::fs;
    use tempfile::TempDir;

    struct ExtensionConverter {
        name: &'static str,
        order: i32,
        extension: Option<&'static str>,
    }

    impl Converter for ExtensionConverter {
        fn name(&self) -> &str {
            self.name
        }

        fn order(&self) -> i32 {
            self.order
        }

        fn matches(&self, source: &Source) -> bool {
            self.extension
                .map(|extension| source.entry.extension() == extension)
                .unwrap_or(true)
        }

        fn convert(&self, body: &str) -> Result<String> {
            Ok(body.to_string())
        }

        fn output_extension(&self, _source: &Source) -> String {
            ".html".to_string()
        }
    }

    fn source(dir: &TempDir, name: &str) -> Source {
        let file = dir.path().join(name);
        fs::write(&file, "x").unwrap();
        Source {
            entry: SourceEntry::new(dir.path(), &file).unwrap(),
            meta: Meta::default(),
            body: "x".to_string(),
        }
    }

    #[test]
    fn test_converter_resolution_order() {
        let dir = TempDir::new().unwrap();
        let mkd = source(&dir, "notes.mkd");

        let mut registry = Registry::default();
        registry.register_converter(Arc::new(ExtensionConverter {
            name: "generic",
            order: 20,
            extension: None,
        }));
        registry.register_converter(Arc::new(ExtensionConverter {
            name: "md-only",
            order: 10,
            extension: Some("md"),
        }));

        assert_eq!(registry.converters()[0].name(), "md-only");
        assert_eq!(registry.converter_for(&mkd).unwrap().name(), "generic");
    }

    #[test]
    fn test_no_converter_names_path() {
        let dir = TempDir::new().unwrap();
        let mkd = source(&dir, "notes.mkd");

        let mut registry = Registry::default();
        registry.register_converter(Arc::new(ExtensionConverter {
            name: "md-only",
            order: 0,
            extension: Some("md"),
        }));

        let error = registry.converter_for(&mkd).err().unwrap();
        assert!(matches!(&error, PressError::NoConverter { path } if path.ends_with("notes.mkd")));
        assert!(error.to_string().contains("notes.mkd"));
    }

    #[test]
    fn test_ties_keep_registration_order() {
        let mut registry = Registry::default();
        for name in ["first", "second", "third"] {
            registry.register_converter(Arc::new(ExtensionConverter {
                name,
                order: 5,
                extension: None,
            }));
        }
        let names: Vec<&str> = registry.converters().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_factory_builds_configured_extensions() {
        let settings = SiteConfig::default();
        let context = ExtensionContext {
            settings: &settings,
            highlighter: Arc::new(SyntectHighlighter::new()),
        };
        let registry = ExtensionFactory::builtin().create(&context).unwrap();

        let converters: Vec<&str> = registry.converters().iter().map(|c| c.name()).collect();
        assert_eq!(converters, vec!["markdown", "identity"]);
        let generators: Vec<&str> = registry.generators().iter().map(|g| g.name()).collect();
        assert_eq!(generators, vec!["pagination", "meta_tag_pages"]);
        let processors: Vec<&str> = registry.processors().iter().map(|p| p.name()).collect();
        assert_eq!(processors, vec!["collections", "related_posts"]);

        let mut broken = SiteConfig::default();
        broken.generators.push("sitemap".to_string());
        let context = ExtensionContext {
            settings: &broken,
            highlighter: Arc::new(SyntectHighlighter::new()),
        };
        assert!(matches!(
            ExtensionFactory::builtin().create(&context),
            Err(PressError::UnknownExtension { kind: "generator", .. })
        ));
    }
}
