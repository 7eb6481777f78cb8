use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use wss_protocol::{Envelope, Kind};

use crate::{config::Watch, connections::Hub};

/// Editor droppings and other files nobody wants a reload for.
pub fn is_ignored(name: &str) -> bool {
    name.is_empty()
        || name.ends_with('~')
        || [".swp", ".swo", ".tmp"].iter().any(|ext| name.ends_with(ext))
        || name.chars().all(|c| c.is_ascii_digit())
}

/// `path` relative to `root`, `None` if it is outside of it or inside one of
/// `ignore_dirs`.
pub fn relevant(root: &Path, path: &Path, ignore_dirs: &[String]) -> Option<PathBuf> {
    let rel = path.strip_prefix(root).ok()?;
    if rel.as_os_str().is_empty()
        || rel
            .iter()
            .any(|c| ignore_dirs.iter().any(|d| c.to_str() == Some(d.as_str())))
    {
        return None;
    }
    Some(rel.to_path_buf())
}

pub fn classify(rel: &Path) -> Kind {
    match rel.extension().and_then(|e| e.to_str()) {
        Some("css") => Kind::HmrCssUpdate,
        Some("js" | "mjs" | "jsx" | "ts" | "mts" | "tsx") => Kind::HmrJsUpdate,
        Some("html" | "htm") => Kind::HmrReload,
        _ => Kind::NotifyUpdate,
    }
}

/// The push for a changed file, `None` if it is ignored.
pub fn event_for(rel: &Path) -> Option<Envelope> {
    let name = rel.file_name()?.to_str()?;
    if is_ignored(name) {
        return None;
    }
    let web_path: Vec<&str> = rel.iter().filter_map(|c| c.to_str()).collect();
    Some(Envelope::new(
        classify(rel),
        format!("/{}", web_path.join("/")),
    ))
}

/// Lets through at most one event per path per window.
pub struct Debouncer {
    window: Duration,
    last: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    pub fn admit(&mut self, path: &Path, now: Instant) -> bool {
        let window = self.window;
        self.last
            .retain(|_, at| now.saturating_duration_since(*at) < window);
        if self.last.contains_key(path) {
            return false;
        }
        self.last.insert(path.to_path_buf(), now);
        true
    }
}

type Events = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// The watcher must be kept alive for as long as events are wanted.
fn start_watching(root: &Path) -> notify::Result<(RecommendedWatcher, Events)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        // only fails when the actor is gone
        let _ = tx.send(res);
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok((watcher, rx))
}

fn wanted(kind: &EventKind) -> bool {
    kind.is_create() || kind.is_modify() || kind.is_remove()
}

pub async fn watcher_actor(
    hub: Arc<Hub>,
    root: PathBuf,
    watch: Watch,
    canceltoken: CancellationToken,
) -> anyhow::Result<()> {
    if !watch.enabled {
        log::info!("File watching is disabled");
        canceltoken.cancelled().await;
        return Ok(());
    }

    let (_watcher, mut events) =
        start_watching(&root).with_context(|| format!("watching {:?}", root))?;
    log::info!("Watching {:?}", root);

    let mut debouncer = Debouncer::new(watch.debounce());
    loop {
        let res = select! {
            _ = canceltoken.cancelled() => break,
            res = events.recv() => res,
        };
        let event = match res {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                log::warn!("File watcher: {}", e);
                continue;
            }
            None => anyhow::bail!("the file watcher stopped"),
        };
        if !wanted(&event.kind) {
            continue;
        }

        let now = Instant::now();
        for path in &event.paths {
            let Some(rel) = relevant(&root, path, &watch.ignore_dirs) else {
                continue;
            };
            if !debouncer.admit(&rel, now) {
                continue;
            }
            if let Some(env) = event_for(&rel) {
                log::debug!("{} {}", env.type_str(), env.body().as_text());
                hub.push_all(&env);
            }
        }
    }

    Ok(())
}
