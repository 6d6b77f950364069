use crate::error::{IoContext, PressError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use walkdir::WalkDir;

const RECORD_FILE_NAME: &str = "build-record.json";

/// Persisted summary of the last successful build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecord {
    pub build_time_millis: i64,
    pub show_drafts: bool,
    pub config_file_count: usize,
}

impl BuildRecord {
    pub fn new(time: SystemTime, show_drafts: bool, config_file_count: usize) -> Self {
        let build_time_millis = time
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0);
        Self {
            build_time_millis,
            show_drafts,
            config_file_count,
        }
    }

    pub fn time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.build_time_millis.max(0) as u64)
    }
}

pub fn record_path(work_dir: &Path) -> PathBuf {
    work_dir.join(RECORD_FILE_NAME)
}

pub fn load_record(work_dir: &Path) -> Option<BuildRecord> {
    let content = fs::read_to_string(record_path(work_dir)).ok()?;
    serde_json::from_str(&content).ok()
}

pub fn save_record(work_dir: &Path, record: &BuildRecord) -> Result<()> {
    fs::create_dir_all(work_dir).io_context("creating work directory", work_dir)?;
    let path = record_path(work_dir);
    let content = serde_json::to_string_pretty(record).map_err(|error| PressError::JsonParse {
        path: path.clone(),
        message: error.to_string(),
    })?;
    fs::write(&path, content).io_context("writing build record", &path)?;
    debug!(path = %path.display(), "build record saved");
    Ok(())
}

/// Dotfiles, `#` autosave files and `~` backups never affect a build.
pub fn is_watched_name(name: &str) -> bool {
    !(name.starts_with('.') || name.starts_with('#') || name.ends_with('~'))
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|metadata| metadata.modified()).ok()
}

fn millis(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0)
}

/// Compared at millisecond precision, the resolution of the build record.
pub fn is_newer(time: SystemTime, since: SystemTime) -> bool {
    millis(time) > millis(since)
}

/// Files under `dir` modified after `since`.
pub fn changed_files(dir: &Path, since: SystemTime) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| is_watched_name(&entry.file_name().to_string_lossy()))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .metadata()
                .ok()
                .and_then(|metadata| metadata.modified().ok())
                .map(|time| is_newer(time, since))
                .unwrap_or(true)
        })
        .map(|entry| entry.into_path())
        .collect()
}

/// Inputs that decide whether the previous output can be kept.
#[derive(Debug, Clone)]
pub struct StalenessCheck<'a> {
    pub config_files: &'a [PathBuf],
    pub show_drafts: bool,
    pub watched_dirs: &'a [PathBuf],
}

impl StalenessCheck<'_> {
    pub fn is_stale(&self, record: Option<&BuildRecord>) -> bool {
        let Some(record) = record else {
            info!("no build record, site is stale");
            return true;
        };

        if record.show_drafts != self.show_drafts {
            info!(
                recorded = record.show_drafts,
                requested = self.show_drafts,
                "drafts setting changed"
            );
            return true;
        }

        if record.build_time_millis <= 0 {
            return true;
        }
        let built = record.time();

        if record.config_file_count != self.config_files.len() {
            info!("config file set changed");
            return true;
        }
        if let Some(file) = self
            .config_files
            .iter()
            .find(|file| modified(file).map(|time| is_newer(time, built)).unwrap_or(true))
        {
            info!(path = %file.display(), "config file changed");
            return true;
        }

        for dir in self.watched_dirs {
            if let Some(file) = changed_files(dir, built).first() {
                info!(path = %file.display(), "source changed since last build");
                return true;
            }
        }

        debug!("site is up to date");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn set_modified(path: &Path, time: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    struct Fixture {
        _dir: TempDir,
        config: PathBuf,
        source: PathBuf,
        sources: PathBuf,
    }

    fn fixture(at: SystemTime) -> Fixture {
        let dir = TempDir::new().unwrap();
        let sources = dir.path().join("pages");
        fs::create_dir_all(&sources).unwrap();
        let config = dir.path().join("config.yml");
        let source = sources.join("index.md");
        fs::write(&config, "title: x\n").unwrap();
        fs::write(&source, "---\n---\nhi\n").unwrap();
        fs::write(sources.join(".swap"), "ignored").unwrap();
        set_modified(&config, at);
        set_modified(&source, at);
        set_modified(&sources.join(".swap"), at + Duration::from_secs(60));
        Fixture {
            _dir: dir,
            config,
            source,
            sources,
        }
    }

    #[test]
    fn test_record_round_trip_and_missing() {
        let dir = TempDir::new().unwrap();
        assert!(load_record(dir.path()).is_none());

        let record = BuildRecord::new(SystemTime::now(), true, 2);
        save_record(&dir.path().join("work"), &record).unwrap();
        let content = fs::read_to_string(dir.path().join("work/build-record.json")).unwrap();
        assert!(content.contains("buildTimeMillis"));
        assert_eq!(load_record(&dir.path().join("work")), Some(record));
    }

    #[test]
    fn test_staleness_by_mtime() {
        let built = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let fixture = fixture(built);
        let record = BuildRecord::new(built, false, 1);
        let config_files = vec![fixture.config.clone()];
        let watched = vec![fixture.sources.clone()];
        let check = StalenessCheck {
            config_files: &config_files,
            show_drafts: false,
            watched_dirs: &watched,
        };

        assert!(!check.is_stale(Some(&record)));
        assert!(check.is_stale(None));

        set_modified(&fixture.source, built + Duration::from_secs(1));
        assert!(check.is_stale(Some(&record)));
    }

    #[test]
    fn test_staleness_by_settings() {
        let built = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let fixture = fixture(built);
        let config_files = vec![fixture.config.clone()];
        let watched = vec![fixture.sources.clone()];
        let check = StalenessCheck {
            config_files: &config_files,
            show_drafts: true,
            watched_dirs: &watched,
        };

        assert!(check.is_stale(Some(&BuildRecord::new(built, false, 1))));
        assert!(!check.is_stale(Some(&BuildRecord::new(built, true, 1))));
        assert!(check.is_stale(Some(&BuildRecord::new(built, true, 2))));
        assert!(check.is_stale(Some(&BuildRecord {
            build_time_millis: 0,
            show_drafts: true,
            config_file_count: 1,
        })));

        set_modified(&fixture.config, built + Duration::from_secs(1));
        assert!(check.is_stale(Some(&BuildRecord::new(built, true, 1))));
    }

    #[test]
    fn test_watched_names() {
        assert!(is_watched_name("post.md"));
        assert!(!is_watched_name(".DS_Store"));
        assert!(!is_watched_name("#post.md#"));
        assert!(!is_watched_name("post.md~"));
    }
}
