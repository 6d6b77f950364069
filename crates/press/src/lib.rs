pub mod collection;
pub mod config;
pub mod content;
pub mod converter;
pub mod error;
pub mod executor;
pub mod highlight;
pub mod links;
pub mod listing;
pub mod observer;
pub mod pagination;
pub mod registry;
pub mod related;
pub mod renderer;
pub mod site;
pub mod source;
pub mod stale;
pub mod taxonomy;
pub mod theme;
pub mod view;

pub use config::{Config, RenderStrategy, SiteConfig};
pub use content::{Content, ContentId, ContentKind, StaticFile};
pub use error::*;
pub use observer::{DEFAULT_POLL_INTERVAL, Observer};
pub use registry::{Converter, ExtensionContext, ExtensionFactory, Generator, Processor, Registry, Stage};
pub use site::{NewContentKind, Site, SiteBuilder};
pub use stale::BuildRecord;
pub use theme::*;
