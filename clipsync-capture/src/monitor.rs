//! The polling loop and its Idle/Watching state machine.

use crate::source::ClipboardSource;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capture monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Poll interval. Range validation happens at the config surface;
    /// the monitor takes what it is given.
    pub poll_interval: Duration,
    /// Reject non-`text/*` content.
    pub text_only: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            text_only: false,
        }
    }
}

/// A clipboard change, carrying the raw (pre-encryption) content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEvent {
    pub content: Vec<u8>,
    pub content_type: String,
}

enum WatchState {
    Idle,
    Watching {
        shutdown_tx: mpsc::Sender<()>,
        task: JoinHandle<()>,
    },
}

/// Watches a [`ClipboardSource`] and emits one [`CaptureEvent`] per
/// content change.
pub struct CaptureMonitor<S: ClipboardSource> {
    source: Arc<Mutex<S>>,
    config: MonitorConfig,
    event_tx: mpsc::Sender<CaptureEvent>,
    /// SHA-256 of the last emitted content, per monitor instance.
    last_hash: Arc<Mutex<Option<[u8; 32]>>>,
    state: tokio::sync::Mutex<WatchState>,
}

impl<S: ClipboardSource> CaptureMonitor<S> {
    pub fn new(source: S, config: MonitorConfig, event_tx: mpsc::Sender<CaptureEvent>) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            config,
            event_tx,
            last_hash: Arc::new(Mutex::new(None)),
            state: tokio::sync::Mutex::new(WatchState::Idle),
        }
    }

    /// Begins watching. Returns false (and does nothing) when already
    /// watching.
    pub async fn start(&self) -> bool {
        let mut state = self.state.lock().await;
        if matches!(*state, WatchState::Watching { .. }) {
            debug!("capture monitor already watching, start is a no-op");
            return false;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let source = self.source.clone();
        let last_hash = self.last_hash.clone();
        let event_tx = self.event_tx.clone();
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => {
                        if !poll_once(&source, &last_hash, &config, &event_tx).await {
                            break;
                        }
                    }
                }
            }
            debug!("capture monitor loop exited");
        });

        *state = WatchState::Watching { shutdown_tx, task };
        true
    }

    /// Stops watching and joins the polling task, so no event delivery is
    /// in flight once this returns. Returns false when already idle.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, WatchState::Idle) {
            WatchState::Idle => false,
            WatchState::Watching { shutdown_tx, task } => {
                let _ = shutdown_tx.send(()).await;
                if task.await.is_err() {
                    warn!("capture monitor task panicked");
                }
                true
            }
        }
    }

    pub async fn is_watching(&self) -> bool {
        matches!(*self.state.lock().await, WatchState::Watching { .. })
    }
}

/// One poll. Returns false when the event channel is gone and the loop
/// should exit.
async fn poll_once<S: ClipboardSource>(
    source: &Arc<Mutex<S>>,
    last_hash: &Arc<Mutex<Option<[u8; 32]>>>,
    config: &MonitorConfig,
    event_tx: &mpsc::Sender<CaptureEvent>,
) -> bool {
    let read = {
        let mut guard = source.lock().unwrap();
        guard.read()
    };

    let read = match read {
        Ok(Some(read)) => read,
        Ok(None) => return true,
        Err(e) => {
            warn!("clipboard read failed: {e}");
            return true;
        }
    };

    if read.content.is_empty() {
        return true;
    }
    if config.text_only && !read.content_type.starts_with("text/") {
        debug!(content_type = %read.content_type, "filtered non-text clipboard content");
        return true;
    }

    let hash: [u8; 32] = Sha256::digest(&read.content).into();
    {
        let mut last = last_hash.lock().unwrap();
        if *last == Some(hash) {
            return true;
        }
        *last = Some(hash);
    }

    let event = CaptureEvent {
        content: read.content,
        content_type: read.content_type,
    };
    if event_tx.send(event).await.is_err() {
        warn!("capture event channel closed, stopping monitor loop");
        return false;
    }
    true
}
