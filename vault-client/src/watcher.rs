//! Filesystem change events feeding the debouncer (§5 "Client-side", §9).
//!
//! The actual filesystem watcher is an external collaborator per the
//! specification; this module is the thin adapter translating its
//! `notify`-crate events into the bounded, coalescing queue the debouncer
//! drains. Backpressure is expressed as queue capacity (default 1024) with
//! oldest-dropped-by-path coalescing: a new event for a path already queued
//! replaces it in place rather than growing the queue, and a new path
//! arriving at capacity drops the globally oldest queued event.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;
use vault_api_types::{Action, RepoError};

/// Default bound on the number of distinct pending paths (§9).
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// One coalesced filesystem change, keyed by its repository-relative path.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub path: String,
    pub local_path: PathBuf,
    pub action: Action,
}

struct Inner {
    capacity: usize,
    order: VecDeque<String>,
    by_path: HashMap<String, ChangeEvent>,
}

/// Bounded, path-coalescing event queue shared between the watcher callback
/// and the debouncer's drain loop.
pub struct ChangeQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl ChangeQueue {
    pub fn new(capacity: usize) -> Self {
        ChangeQueue {
            inner: Mutex::new(Inner {
                capacity,
                order: VecDeque::new(),
                by_path: HashMap::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Push a new event, coalescing with any already-queued event for the
    /// same path. Never blocks: at capacity, the globally oldest *other*
    /// path is dropped to make room.
    pub fn push(&self, event: ChangeEvent) {
        let mut inner = self.inner.lock().unwrap();
        if inner.by_path.contains_key(&event.path) {
            inner.by_path.insert(event.path.clone(), event);
        } else {
            if inner.order.len() >= inner.capacity {
                if let Some(dropped) = inner.order.pop_front() {
                    inner.by_path.remove(&dropped);
                    log::warn!("watcher queue at capacity, dropping oldest pending path {dropped}");
                }
            }
            inner.order.push_back(event.path.clone());
            inner.by_path.insert(event.path.clone(), event);
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Pop the oldest queued event, waiting if the queue is empty.
    pub async fn pop(&self) -> ChangeEvent {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                while let Some(path) = inner.order.pop_front() {
                    if let Some(event) = inner.by_path.remove(&path) {
                        return event;
                    }
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Start a recursive watch over `root`, translating `notify` events into
/// [`ChangeEvent`]s pushed onto `queue`. The returned `RecommendedWatcher`
/// must be kept alive for the duration of the watch; dropping it stops
/// delivery.
pub fn watch_tree(root: &Path, queue: std::sync::Arc<ChangeQueue>) -> Result<RecommendedWatcher, RepoError> {
    let root = root.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        let event = match result {
            Ok(event) => event,
            Err(err) => {
                log::warn!("filesystem watcher error: {err}");
                return;
            }
        };
        for path in event.paths {
            let Some(relative) = relative_repo_path(&root, &path) else {
                continue;
            };
            let action = action_for(&event.kind, &path);
            queue.push(ChangeEvent {
                path: relative,
                local_path: path,
                action,
            });
        }
    })
    .map_err(|err| RepoError::ConfigError(format!("create filesystem watcher: {err}")))?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|err| RepoError::ConfigError(format!("watch {}: {err}", root.display())))?;

    Ok(watcher)
}

fn relative_repo_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn action_for(kind: &notify::EventKind, path: &Path) -> Action {
    use notify::EventKind;
    match kind {
        EventKind::Remove(_) => Action::Deleted,
        EventKind::Create(_) => Action::Created,
        _ => {
            if path.exists() {
                Action::Modified
            } else {
                Action::Deleted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(path: &str) -> ChangeEvent {
        ChangeEvent {
            path: path.to_string(),
            local_path: PathBuf::from(path),
            action: Action::Modified,
        }
    }

    #[tokio::test]
    async fn push_then_pop_returns_in_fifo_order() {
        let queue = ChangeQueue::new(10);
        queue.push(event("a.txt"));
        queue.push(event("b.txt"));

        assert_eq!(queue.pop().await.path, "a.txt");
        assert_eq!(queue.pop().await.path, "b.txt");
    }

    #[tokio::test]
    async fn repeated_path_coalesces_in_place() {
        let queue = ChangeQueue::new(10);
        queue.push(event("a.txt"));
        queue.push(event("b.txt"));
        queue.push(event("a.txt"));

        // a.txt keeps its original queue position; only one entry for it.
        assert_eq!(queue.pop().await.path, "a.txt");
        assert_eq!(queue.pop().await.path, "b.txt");
    }

    #[tokio::test]
    async fn at_capacity_drops_the_globally_oldest_path() {
        let queue = ChangeQueue::new(2);
        queue.push(event("a.txt"));
        queue.push(event("b.txt"));
        queue.push(event("c.txt")); // a.txt is evicted

        assert_eq!(queue.pop().await.path, "b.txt");
        assert_eq!(queue.pop().await.path, "c.txt");
    }
}
