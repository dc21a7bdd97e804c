//! Debouncer (§5 "Client-side"): coalesces bursts of changes to the same
//! path into a single event once the path has been idle for `idle` (default
//! 250 ms), then forwards it to the committer.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::watcher::ChangeEvent;

/// Default idle window before a coalesced burst is considered settled.
pub const DEFAULT_IDLE: Duration = Duration::from_millis(250);

/// How often the debouncer checks for paths that have gone idle. Coarser
/// than `idle` itself so the check is cheap; fine enough that the observed
/// delay beyond `idle` is negligible.
const POLL_INTERVAL_DIVISOR: u32 = 5;

/// Given the last-seen timestamps for pending paths, return the paths whose
/// idle window has elapsed as of `now`. Pulled out as a pure function so the
/// debounce decision is testable without real sleeps.
fn paths_ready(last_seen: &HashMap<String, Instant>, idle: Duration, now: Instant) -> Vec<String> {
    last_seen
        .iter()
        .filter(|(_, seen)| now.saturating_duration_since(**seen) >= idle)
        .map(|(path, _)| path.clone())
        .collect()
}

/// Spawn the debouncer loop: reads raw events from `events`, emits coalesced
/// events on the returned channel once each path has been idle for `idle`.
/// On `events` closing, any still-pending bursts are flushed immediately
/// before the output channel closes.
pub fn spawn(mut events: mpsc::Receiver<ChangeEvent>, idle: Duration) -> mpsc::Receiver<ChangeEvent> {
    let (out_tx, out_rx) = mpsc::channel(crate::watcher::DEFAULT_QUEUE_CAPACITY);

    tokio::spawn(async move {
        let mut pending: HashMap<String, ChangeEvent> = HashMap::new();
        let mut last_seen: HashMap<String, Instant> = HashMap::new();
        let poll = (idle / POLL_INTERVAL_DIVISOR).max(Duration::from_millis(10));
        let mut ticker = tokio::time::interval(poll);

        loop {
            tokio::select! {
                received = events.recv() => {
                    match received {
                        Some(event) => {
                            last_seen.insert(event.path.clone(), Instant::now());
                            pending.insert(event.path.clone(), event);
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    for path in paths_ready(&last_seen, idle, Instant::now()) {
                        last_seen.remove(&path);
                        if let Some(event) = pending.remove(&path) {
                            if out_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }

        for (_, event) in pending {
            let _ = out_tx.send(event).await;
        }
    });

    out_rx
}
