use crate::config::is_config_file_name;
use crate::content::StaticFile;
use crate::error::{IoContext, PressError, Result};
use crate::site::Site;
use crate::source::SourceEntry;
use crate::stale::is_watched_name;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
}

impl Change {
    pub fn path(&self) -> &Path {
        match self {
            Change::Created(path) | Change::Modified(path) | Change::Deleted(path) => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

/// One watched location: a directory tree, a depth-limited directory or a single file.
#[derive(Debug, Clone)]
struct WatchRoot {
    path: PathBuf,
    max_depth: Option<usize>,
    accept: fn(&str) -> bool,
}

impl WatchRoot {
    fn tree(path: PathBuf) -> Self {
        Self {
            path,
            max_depth: None,
            accept: is_watched_name,
        }
    }

    fn file(path: PathBuf) -> Self {
        Self {
            path,
            max_depth: Some(0),
            accept: |_| true,
        }
    }

    fn collect(&self, into: &mut HashMap<PathBuf, Stamp>) {
        if !self.path.exists() {
            return;
        }
        let mut walker = WalkDir::new(&self.path);
        if let Some(depth) = self.max_depth {
            walker = walker.max_depth(depth);
        }
        let accept = self.accept;
        for entry in walker
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || accept(&entry.file_name().to_string_lossy()))
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
        {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            into.insert(
                entry.into_path(),
                Stamp {
                    modified: metadata.modified().ok(),
                    len: metadata.len(),
                },
            );
        }
    }
}

/// A set of roots snapshotted together and diffed on every check.
#[derive(Debug, Default)]
struct WatchGroup {
    roots: Vec<WatchRoot>,
    snapshot: HashMap<PathBuf, Stamp>,
}

impl WatchGroup {
    fn new(roots: Vec<WatchRoot>) -> Self {
        Self {
            roots,
            snapshot: HashMap::new(),
        }
    }

    fn scan(&self) -> HashMap<PathBuf, Stamp> {
        let mut snapshot = HashMap::new();
        for root in &self.roots {
            root.collect(&mut snapshot);
        }
        snapshot
    }

    fn initialize(&mut self) {
        self.snapshot = self.scan();
    }

    fn poll(&mut self) -> Vec<Change> {
        let current = self.scan();
        let mut changes: Vec<Change> = current
            .iter()
            .filter_map(|(path, stamp)| match self.snapshot.get(path) {
                None => Some(Change::Created(path.clone())),
                Some(previous) if previous != stamp => Some(Change::Modified(path.clone())),
                Some(_) => None,
            })
            .collect();
        changes.extend(
            self.snapshot
                .keys()
                .filter(|path| !current.contains_key(*path))
                .map(|path| Change::Deleted(path.clone())),
        );
        changes.sort_by(|a, b| a.path().cmp(b.path()));
        self.snapshot = current;
        changes
    }

    fn clear(&mut self) {
        self.snapshot.clear();
    }
}

/// Polling watcher behind the live preview.
///
/// Configuration changes end the loop with [`PressError::ConfigChanged`] so the caller can
/// rebuild the site from scratch. Source and template changes rebuild in place. Asset
/// changes are mirrored into the destination one file at a time.
#[derive(Debug)]
pub struct Observer {
    config: WatchGroup,
    content: WatchGroup,
    assets: Vec<(PathBuf, WatchGroup)>,
    dest_dir: PathBuf,
    active: bool,
}

impl Observer {
    pub fn new(site: &Site) -> Self {
        let mut config_roots: Vec<WatchRoot> = site
            .config_files()
            .into_iter()
            .map(WatchRoot::file)
            .collect();
        config_roots.push(WatchRoot {
            path: site.base_dir().to_path_buf(),
            max_depth: Some(1),
            accept: is_config_file_name,
        });

        let mut content_roots: Vec<WatchRoot> = site
            .source_dirs()
            .iter()
            .cloned()
            .map(WatchRoot::tree)
            .collect();
        content_roots.push(WatchRoot::tree(site.templates_dir().to_path_buf()));

        let assets = site
            .asset_dirs()
            .iter()
            .map(|dir| (dir.clone(), WatchGroup::new(vec![WatchRoot::tree(dir.clone())])))
            .collect();

        Self {
            config: WatchGroup::new(config_roots),
            content: WatchGroup::new(content_roots),
            assets,
            dest_dir: site.dest_dir().to_path_buf(),
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Takes the baseline snapshots.
    pub fn initialize(&mut self) {
        self.config.initialize();
        self.content.initialize();
        for (_, group) in &mut self.assets {
            group.initialize();
        }
        self.active = true;
        debug!("observer initialized");
    }

    /// Polls every group once and reacts to what changed. Returns whether any output changed.
    pub fn check(&mut self, site: &mut Site) -> Result<bool> {
        if !self.active {
            return Ok(false);
        }

        let config_changes = self.config.poll();
        if let Some(change) = config_changes.first() {
            info!(path = %change.path().display(), "configuration changed");
            return Err(PressError::ConfigChanged);
        }

        let mut changed = false;
        let content_changes = self.content.poll();
        if !content_changes.is_empty() {
            for change in &content_changes {
                debug!(?change, "content change");
            }
            info!(changes = content_changes.len(), "rebuilding site");
            match site.build(true) {
                Ok(()) => changed = true,
                Err(error) if error.is_config_changed() => return Err(error),
                Err(error) => error!("Rebuild failed: {error}"),
            }
        }

        for (dir, group) in &mut self.assets {
            for change in group.poll() {
                match apply_asset_change(dir, &self.dest_dir, &change) {
                    Ok(()) => changed = true,
                    Err(error) => {
                        warn!(path = %change.path().display(), "asset update failed: {error}")
                    }
                }
            }
        }
        Ok(changed)
    }

    /// Drops all snapshots; `check` is a no-op until the next `initialize`.
    pub fn destroy(&mut self) {
        self.config.clear();
        self.content.clear();
        for (_, group) in &mut self.assets {
            group.clear();
        }
        self.active = false;
        debug!("observer destroyed");
    }

    /// Polls every `interval` until `stop` is set or the configuration changes,
    /// calling `on_change` after each check that changed the output.
    pub fn run(
        &mut self,
        site: &mut Site,
        stop: &AtomicBool,
        interval: Duration,
        mut on_change: impl FnMut(),
    ) -> Result<()> {
        self.initialize();
        let result = loop {
            if stop.load(Ordering::Relaxed) {
                break Ok(());
            }
            thread::sleep(interval);
            match self.check(site) {
                Ok(true) => on_change(),
                Ok(false) => {}
                Err(error) => break Err(error),
            }
        };
        self.destroy();
        result
    }
}

fn apply_asset_change(asset_dir: &Path, dest_dir: &Path, change: &Change) -> Result<()> {
    match change {
        Change::Created(path) | Change::Modified(path) => {
            let file = StaticFile::new(SourceEntry::new(asset_dir, path)?);
            if file.write(dest_dir)? {
                info!(path = %path.display(), "asset copied");
            }
        }
        Change::Deleted(path) => {
            let relative = path.strip_prefix(asset_dir).map_err(|_| PressError::InvalidPath {
                path: path.clone(),
            })?;
            let target = dest_dir.join(relative);
            if target.is_file() {
                fs::remove_file(&target).io_context("removing asset output", &target)?;
                info!(path = %target.display(), "asset removed");
            }
        }
    }
    Ok(())
}
