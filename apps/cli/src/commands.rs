use axum::Router;
use press_ssg::{DEFAULT_POLL_INTERVAL, NewContentKind, Observer, Site, SiteBuilder};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tower_http::services::ServeDir;
use tower_livereload::Reloader;
use tracing::{error, info};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

fn escape_toml_string(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for character in input.chars() {
        match character {
            '\\' => output.push_str("\\\\"),
            '"' => output.push_str("\\\""),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            control if control < '\u{0020}' => {
                output.push_str(&format!("\\u{:04X}", control as u32));
            }
            other => output.push(other),
        }
    }
    output
}

fn open_site(dir: &Path, drafts: bool) -> Result<Site, press_ssg::PressError> {
    SiteBuilder::new(dir).show_drafts(drafts).build()
}

pub fn init_site(site_dir: &Path) -> CommandResult {
    if site_dir.join("config.toml").exists() {
        return Err(format!("{} already contains a site", site_dir.display()).into());
    }

    fs::create_dir_all(site_dir.join("posts"))?;
    fs::create_dir_all(site_dir.join("pages"))?;
    fs::create_dir_all(site_dir.join("assets"))?;

    let title = site_dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "My Site".to_string());
    let config = format!(
        r#"title = "{}"
paginate = 10
"#,
        escape_toml_string(&title)
    );
    fs::write(site_dir.join("config.toml"), config)?;

    let index = r#"---
title: Home
layout: page
paginate: 10
---
"#;
    fs::write(site_dir.join("pages").join("index.html"), index)?;

    let post = r#"---
title: Hello World
layout: post
tags: [welcome]
---

This is your first post. Everything above the marker is the excerpt.

<!--more-->

```rust
fn main() {
    println!("Hello, world!");
}
```
"#;
    fs::write(
        site_dir.join("posts").join("2024-01-01-hello-world.md"),
        post,
    )?;

    println!("Created new site in {}", site_dir.display());
    println!("  cd {}", site_dir.display());
    println!("  press serve");
    Ok(())
}

pub fn new_content(
    dir: &Path,
    kind: NewContentKind,
    title: &str,
    name: Option<&str>,
    format: &str,
) -> CommandResult {
    let site = open_site(dir, false)?;
    let path = site.new_content(kind, title, name, format)?;
    println!("Created {}", path.display());
    Ok(())
}

pub fn build_site(dir: &Path, force: bool, drafts: bool) -> CommandResult {
    let start = Instant::now();
    let mut site = open_site(dir, drafts)?;
    site.build(force)?;

    println!(
        "Built {} pages, {} posts to {} in {:.2?}",
        site.pages.len(),
        site.posts.len(),
        site.dest_dir().display(),
        start.elapsed()
    );
    Ok(())
}

pub fn clean_site(dir: &Path) -> CommandResult {
    open_site(dir, false)?.clean()?;
    Ok(())
}

/// Runs the observer until `stop` is set, reopening the site whenever its configuration changes.
fn watch(dir: &Path, drafts: bool, mut site: Site, stop: &AtomicBool, reloader: &Reloader) {
    loop {
        let mut observer = Observer::new(&site);
        let outcome = observer.run(&mut site, stop, DEFAULT_POLL_INTERVAL, || reloader.reload());

        match outcome {
            Ok(()) => return,
            Err(error) if error.is_config_changed() => {
                info!("configuration changed, reloading site");
                site = match open_site(dir, drafts) {
                    Ok(site) => site,
                    Err(error) => {
                        error!("Failed to reload site: {error}");
                        return;
                    }
                };
                match site.build(true) {
                    Ok(()) => reloader.reload(),
                    Err(error) => error!("Rebuild failed: {error}"),
                }
            }
            Err(error) => {
                error!("Watch error: {error}");
                return;
            }
        }
    }
}

pub async fn serve_site(dir: &Path, drafts: bool, port: u16, open_browser: bool) -> CommandResult {
    let mut site = open_site(dir, drafts)?;
    site.build(true)?;
    let output = site.dest_dir().to_path_buf();

    let livereload = tower_livereload::LiveReloadLayer::new();
    let reloader = livereload.reloader();
    let stop = Arc::new(AtomicBool::new(false));

    let watcher = {
        let dir = dir.to_path_buf();
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || watch(&dir, drafts, site, &stop, &reloader))
    };

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!("Serving {} at http://{addr}", output.display());
    println!("Press Ctrl+C to stop");

    if open_browser {
        let url = format!("http://localhost:{port}");
        if let Err(error) = open::that(&url) {
            eprintln!("Failed to open browser: {error}");
        }
    }

    let serve_dir = ServeDir::new(&output).append_index_html_on_directories(true);
    let app = Router::new().fallback_service(serve_dir).layer(livereload);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    stop.store(true, Ordering::Relaxed);
    if watcher.join().is_err() {
        eprintln!("Watcher thread panicked");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_escape_toml_string() {
        assert_eq!(escape_toml_string("hello world"), "hello world");
        assert_eq!(escape_toml_string("say \"hi\""), "say \\\"hi\\\"");
        assert_eq!(escape_toml_string("a\\b"), "a\\\\b");
        assert_eq!(escape_toml_string("line1\nline2"), "line1\\nline2");
        assert_eq!(escape_toml_string("bell\u{0007}"), "bell\\u0007");
    }

    #[test]
    fn test_init_then_build() {
        let dir = TempDir::new().unwrap();
        let site_dir = dir.path().join("blog");
        init_site(&site_dir).unwrap();
        assert!(init_site(&site_dir).is_err());

        build_site(&site_dir, true, false).unwrap();
        let public = site_dir.join("target/public");
        assert!(public.join("index.html").is_file());
        assert!(public.join("hello-world/index.html").is_file());

        clean_site(&site_dir).unwrap();
        assert!(!public.exists());
    }

    #[test]
    fn test_watch_returns_when_stopped() {
        let dir = TempDir::new().unwrap();
        init_site(dir.path()).unwrap();
        let site = open_site(dir.path(), false).unwrap();
        let reloader = tower_livereload::LiveReloadLayer::new().reloader();
        let stop = AtomicBool::new(true);

        watch(dir.path(), false, site, &stop, &reloader);
    }

    #[test]
    fn test_new_content_command() {
        let dir = TempDir::new().unwrap();
        init_site(dir.path()).unwrap();
        new_content(dir.path(), NewContentKind::Page, "About", Some("about"), "md").unwrap();
        assert!(dir.path().join("pages/about.md").is_file());
    }
}
