//! Sync client connection state machine.
//!
//! One task owns the transport, the offline queue, and the resolver
//! integration. `Disconnected → Connecting → Connected → Syncing →
//! Connected`, with exponential backoff on any failure. The queue drain
//! is single-flight: one frame in the air, acknowledged before the next
//! is sent, so per-device send order is preserved end to end.

use crate::protocol::{ClientFrame, RelayFrame};
use crate::resolver::resolve;
use crate::transport::RelayTransport;
use crate::{SyncError, SyncResult};
use clipsync_storage::{ItemStore, QueueStore, SessionStore, StorageError};
use clipsync_types::{DeviceId, ItemId, ItemVersion, OperationKind};
use rand::Rng;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Protocol state, reported through [`SyncEvent::StateChanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Connecting,
    Connected,
    Syncing,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Disconnected => write!(f, "disconnected"),
            SyncState::Connecting => write!(f, "connecting"),
            SyncState::Connected => write!(f, "connected"),
            SyncState::Syncing => write!(f, "syncing"),
        }
    }
}

/// Commands that can be sent to the sync client.
#[derive(Debug)]
enum SyncCommand {
    /// Drain the queue now instead of waiting for the next interval.
    SyncNow,
    /// Stop the client loop.
    Stop,
}

/// Events emitted by the sync client for the presentation layer.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    StateChanged { state: SyncState },
    /// A queued operation was acknowledged by the relay.
    OperationAcked { seq: i64 },
    /// A queue drain finished cleanly.
    DrainCompleted { acked: usize },
    /// An inbound version won resolution and was applied locally.
    ItemUpdated { item_id: ItemId },
    /// A drain or connection attempt failed; backoff is in progress.
    SyncFailed { reason: String },
}

/// Sync client configuration.
#[derive(Debug, Clone)]
pub struct SyncClientConfig {
    /// Periodic drain interval while connected.
    pub sync_interval: Duration,
    /// How long one send may wait for its acknowledgment.
    pub ack_timeout: Duration,
    /// First reconnect delay; doubles per consecutive failure.
    pub reconnect_base: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_max: Duration,
}

impl Default for SyncClientConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(10),
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

/// Handle for sending commands to a running [`SyncClient`].
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    /// Triggers an immediate queue drain.
    pub async fn sync_now(&self) -> SyncResult<()> {
        self.command_tx
            .send(SyncCommand::SyncNow)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    /// Stops the client. The loop finishes any in-flight store write
    /// before exiting.
    pub async fn stop(&self) -> SyncResult<()> {
        self.command_tx
            .send(SyncCommand::Stop)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }
}

/// The sync client loop. Created by [`create_sync_client`], consumed by
/// [`SyncClient::run`].
/// A local edit may commit between reading an item's version and writing
/// the resolved winner; each retry reloads and re-resolves.
const APPLY_RETRIES: usize = 3;

pub struct SyncClient {
    items: ItemStore,
    queue: QueueStore,
    sessions: SessionStore,
    user_id: String,
    device_id: DeviceId,
    transport: Box<dyn RelayTransport>,
    config: SyncClientConfig,
    command_rx: mpsc::Receiver<SyncCommand>,
    event_tx: mpsc::Sender<SyncEvent>,
    state: SyncState,
    reconnect_attempts: u32,
}

/// Creates a sync client, its command handle, and its event stream.
pub fn create_sync_client(
    items: ItemStore,
    queue: QueueStore,
    sessions: SessionStore,
    user_id: String,
    device_id: DeviceId,
    transport: Box<dyn RelayTransport>,
    config: SyncClientConfig,
) -> (SyncHandle, mpsc::Receiver<SyncEvent>, SyncClient) {
    let (command_tx, command_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(256);

    let handle = SyncHandle { command_tx };
    let client = SyncClient {
        items,
        queue,
        sessions,
        user_id,
        device_id,
        transport,
        config,
        command_rx,
        event_tx,
        state: SyncState::Disconnected,
        reconnect_attempts: 0,
    };

    (handle, event_rx, client)
}

impl SyncClient {
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Runs the state machine until stopped or the command channel closes.
    pub async fn run(mut self) {
        info!(device = %self.device_id, "sync client started");

        let mut sync_interval = tokio::time::interval(self.config.sync_interval);
        sync_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip the immediate first tick; the Connecting -> Syncing edge
        // already drains on connect.
        sync_interval.tick().await;

        loop {
            match self.state {
                SyncState::Disconnected => {
                    let delay = self.reconnect_delay();
                    debug!(?delay, attempts = self.reconnect_attempts, "reconnect scheduled");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            self.set_state(SyncState::Connecting).await;
                        }
                        cmd = self.command_rx.recv() => match cmd {
                            Some(SyncCommand::SyncNow) => {
                                self.set_state(SyncState::Connecting).await;
                            }
                            Some(SyncCommand::Stop) | None => break,
                        },
                    }
                }

                SyncState::Connecting => match self.transport.connect().await {
                    Ok(()) => {
                        self.reconnect_attempts = 0;
                        // Entering Connected always starts with a drain.
                        self.set_state(SyncState::Syncing).await;
                    }
                    Err(e) => {
                        warn!("connect failed: {e}");
                        self.emit(SyncEvent::SyncFailed {
                            reason: e.to_string(),
                        })
                        .await;
                        self.reconnect_attempts += 1;
                        self.set_state(SyncState::Disconnected).await;
                    }
                },

                SyncState::Syncing => match self.drain_queue().await {
                    Ok(acked) => {
                        if acked > 0 {
                            info!(acked, "queue drain completed");
                        }
                        self.reap_covered_tombstones();
                        self.emit(SyncEvent::DrainCompleted { acked }).await;
                        self.set_state(SyncState::Connected).await;
                    }
                    Err(e) => {
                        warn!("queue drain failed: {e}");
                        self.emit(SyncEvent::SyncFailed {
                            reason: e.to_string(),
                        })
                        .await;
                        self.reconnect_attempts += 1;
                        self.set_state(SyncState::Disconnected).await;
                    }
                },

                SyncState::Connected => {
                    tokio::select! {
                        cmd = self.command_rx.recv() => match cmd {
                            Some(SyncCommand::SyncNow) => {
                                self.set_state(SyncState::Syncing).await;
                            }
                            Some(SyncCommand::Stop) => break,
                            None => {
                                info!("command channel closed, stopping sync client");
                                break;
                            }
                        },
                        _ = sync_interval.tick() => {
                            self.set_state(SyncState::Syncing).await;
                        }
                        frame = self.transport.recv() => match frame {
                            Some(RelayFrame::Apply { item }) => {
                                self.apply_inbound(item).await;
                            }
                            Some(RelayFrame::Ack { seq }) => {
                                // Duplicate ack from an earlier replay.
                                debug!(seq, "ack outside a drain, clearing queue entry");
                                if let Err(e) = self.queue.ack(seq) {
                                    error!("failed to clear acked operation {seq}: {e}");
                                }
                            }
                            Some(RelayFrame::TombstoneAck { item_id, device }) => {
                                self.record_tombstone_ack(item_id, &device);
                            }
                            None => {
                                warn!("relay closed the connection");
                                self.emit(SyncEvent::SyncFailed {
                                    reason: "relay closed the connection".to_string(),
                                })
                                .await;
                                self.reconnect_attempts += 1;
                                self.set_state(SyncState::Disconnected).await;
                            }
                        },
                    }
                }
            }
        }

        info!(device = %self.device_id, "sync client stopped");
    }

    async fn set_state(&mut self, state: SyncState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "sync state transition");
            self.state = state;
            self.emit(SyncEvent::StateChanged { state }).await;
        }
    }

    async fn emit(&self, event: SyncEvent) {
        // The presentation layer may not be listening; that must never
        // stall the sync loop.
        let _ = self.event_tx.try_send(event);
    }

    fn reconnect_delay(&self) -> Duration {
        let exp = self
            .config
            .reconnect_base
            .saturating_mul(1u32 << self.reconnect_attempts.min(16));
        let capped = exp.min(self.config.reconnect_max);
        // Up to 10% jitter so a fleet of devices does not reconnect in
        // lockstep.
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 10);
        capped + Duration::from_millis(jitter_ms)
    }

    /// Sends every pending operation in sequence order, one at a time,
    /// waiting for each acknowledgment before the next send.
    async fn drain_queue(&mut self) -> SyncResult<usize> {
        let pending = self.queue.pending()?;
        if pending.is_empty() {
            return Ok(0);
        }
        debug!(count = pending.len(), "draining offline queue");

        let mut acked = 0usize;
        for op in pending {
            if op.kind.mutates_item() {
                self.items.mark_sync_attempt(op.item_id)?;
            }
            self.transport.send(ClientFrame::from_operation(&op)).await?;
            self.await_ack(op.seq).await?;
            self.queue.ack(op.seq)?;
            if op.kind.mutates_item() {
                self.items.mark_synced(op.item_id)?;
            }
            self.emit(SyncEvent::OperationAcked { seq: op.seq }).await;
            acked += 1;
        }
        Ok(acked)
    }

    /// Waits for the ack of `seq`, applying any inbound changes that
    /// arrive interleaved with it.
    async fn await_ack(&mut self, seq: i64) -> SyncResult<()> {
        let deadline = tokio::time::Instant::now() + self.config.ack_timeout;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.transport.recv())
                .await
                .map_err(|_| SyncError::AckTimeout {
                    seq,
                    timeout_ms: self.config.ack_timeout.as_millis() as u64,
                })?;

            match frame {
                Some(RelayFrame::Ack { seq: got }) if got == seq => return Ok(()),
                Some(RelayFrame::Ack { seq: stale }) => {
                    debug!(stale, waiting_for = seq, "out-of-band ack");
                    self.queue.ack(stale)?;
                }
                Some(RelayFrame::Apply { item }) => self.apply_inbound(item).await,
                Some(RelayFrame::TombstoneAck { item_id, device }) => {
                    self.record_tombstone_ack(item_id, &device);
                }
                None => {
                    return Err(SyncError::NetworkUnavailable(
                        "relay closed the connection".to_string(),
                    ))
                }
            }
        }
    }

    /// Resolves an inbound version against the local one and applies the
    /// winner. Duplicate deliveries are no-ops.
    ///
    /// The write is guarded by the clock the resolver compared against:
    /// a local edit committing between the read and the write fails
    /// `Conflict` instead of being overwritten, and the resolution is
    /// redone against the fresh version.
    async fn apply_inbound(&mut self, remote: ItemVersion) {
        let item_id = remote.item_id;
        for _ in 0..APPLY_RETRIES {
            let local = match self.items.current_version(item_id) {
                Ok(v) => v,
                Err(e) => {
                    error!(%item_id, "failed to load local version: {e}");
                    return;
                }
            };

            if let Some(local) = &local {
                if remote.clock == local.clock {
                    debug!(%item_id, "duplicate delivery, already at this version");
                    return;
                }
                let winner = resolve(local, &remote);
                if winner.clock == local.clock {
                    debug!(%item_id, local = %local.clock, remote = %remote.clock,
                        "local version wins, inbound discarded");
                    return;
                }
            }

            let basis = local.as_ref().map(|v| &v.clock);
            match self.items.apply_remote(&self.user_id, &remote, basis) {
                Ok(()) => {
                    debug!(%item_id, clock = %remote.clock, "applied inbound version");
                    if remote.is_tombstone() {
                        self.acknowledge_tombstone(&remote);
                    }
                    self.emit(SyncEvent::ItemUpdated { item_id }).await;
                    return;
                }
                Err(StorageError::Conflict { .. }) => {
                    debug!(%item_id, "local edit raced the apply, re-resolving");
                    continue;
                }
                Err(e) => {
                    // Surfaced, never silently dropped: the item id and both
                    // competing clocks are in the event.
                    error!(%item_id, "failed to apply inbound version: {e}");
                    self.emit(SyncEvent::SyncFailed {
                        reason: format!("apply {item_id} at {}: {e}", remote.clock),
                    })
                    .await;
                    return;
                }
            }
        }

        warn!(%item_id, "inbound version kept losing to local edits, dropping it");
        self.emit(SyncEvent::SyncFailed {
            reason: format!("apply {item_id} at {}: retries exhausted", remote.clock),
        })
        .await;
    }

    /// Records deletion coverage after applying an inbound tombstone:
    /// this device and the deleter have both seen it, and an `ack_delete`
    /// operation is queued so the relay can tell the remaining peers.
    fn acknowledge_tombstone(&self, remote: &ItemVersion) {
        let item_id = remote.item_id;
        for device in [&self.device_id, &remote.clock.device_id] {
            if let Err(e) = self.items.ack_tombstone(item_id, device) {
                warn!(%item_id, %device, "failed to record tombstone ack: {e}");
            }
        }
        if let Err(e) =
            self.queue
                .enqueue(OperationKind::AckDelete, item_id, Vec::new(), remote.clock.clone())
        {
            warn!(%item_id, "failed to queue delete acknowledgment: {e}");
        }
    }

    fn record_tombstone_ack(&self, item_id: ItemId, device: &DeviceId) {
        debug!(%item_id, %device, "peer acknowledged tombstone");
        if let Err(e) = self.items.ack_tombstone(item_id, device) {
            warn!(%item_id, "failed to record tombstone ack: {e}");
        }
    }

    /// Drops tombstones acknowledged by every registered device. Skipped
    /// while no device sessions exist, since coverage would be vacuous.
    fn reap_covered_tombstones(&self) {
        let registered = match self.sessions.active_devices(&self.user_id) {
            Ok(devices) => devices,
            Err(e) => {
                warn!("failed to load registered devices: {e}");
                return;
            }
        };
        if registered.is_empty() {
            return;
        }
        if let Err(e) = self.items.reap_tombstones(&registered) {
            warn!("tombstone reap failed: {e}");
        }
    }
}
