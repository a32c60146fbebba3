//! Device state reconciliation engine.
//!
//! Consumes snapshot fetches, push events and local operator edits, applies
//! them to the device registry through the invariant coordinators, and
//! schedules outbound confirmation writes. All mutations are serialized
//! through one actor mailbox; network I/O never runs inside the mutation
//! path — results re-enter the mailbox as events.

pub mod scheduler;

pub use scheduler::{Concern, WriteHandler, WriteKey, WritePayload, WriteScheduler};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::api::backend::Backend;
use crate::device::controls;
use crate::device::{Device, Endpoint, StreamConfig, StreamType};
use crate::pairing;
use crate::registry::DeviceRegistry;
use crate::stream;

/// Default interval for the snapshot re-poll that backs up the push channel.
pub const SNAPSHOT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Mailbox capacity for the engine actor.
const MAILBOX_CAPACITY: usize = 64;

// ── Events ───────────────────────────────────────────────────────────────────

/// One operator-initiated mutation of a single device.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    SetNickname(String),
    SetControl { control_id: u32, value: f64 },
    SetStream(StreamConfig),
    AddEndpoint(Endpoint),
    RemoveEndpoint(usize),
    ReplaceEndpoint(usize, Endpoint),
    SetEnabled(bool),
    SetStreamType(StreamType),
    ToggleRecording,
    AssignLeader { leader: String },
    ClearLeader,
    SetSyncGroup(String),
    ResetControls,
}

/// Everything that can mutate the registry, in one mailbox type so arrival
/// order is the only ordering that matters.
#[derive(Debug)]
pub enum Event {
    /// Full device list from the backend, applied as one atomic merge.
    Snapshot(Vec<Device>),
    /// Incremental push: a device appeared (idempotent on re-announce).
    DeviceAdded(Device),
    /// Incremental push: a device vanished.
    DeviceRemoved(String),
    /// Push: the backend reported stream errors for a device.
    StreamError { bus_info: String, errors: Vec<String> },
    /// Optimistic local edit from the operator.
    LocalEdit { bus_info: String, edit: Edit },
    /// A confirmation write finished (success or failure).
    WriteResolved { key: WriteKey, result: Result<(), String> },
    /// The push channel dropped; no device can be assumed present.
    ChannelDown,
    /// The push channel (re)connected; a fresh snapshot is authoritative.
    ChannelUp,
    /// Stop the engine loop.
    Shutdown,
}

/// Non-fatal conditions surfaced to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Device-reported stream failure; its stream has been disabled.
    StreamError { bus_info: String, errors: Vec<String> },
    /// A confirmation write failed. The optimistic local value is kept; the
    /// operator must be told the intent did not persist.
    WriteFailed { key: WriteKey, error: String },
    /// A local edit was dropped (unknown device, gated control, ...).
    EditRejected { bus_info: String, reason: String },
}

/// Outcome of applying one event: writes to dispatch and notices to surface.
#[derive(Debug, Default)]
pub struct Applied {
    pub writes: Vec<(WriteKey, WritePayload)>,
    pub notices: Vec<Notice>,
}

// ── Reconciler ───────────────────────────────────────────────────────────────

/// Applies events to the registry under the cross-device invariants.
///
/// Owns the registry, the in-flight edit guards and the write scheduler.
/// Callers (normally the [`SyncEngine`] actor) apply one event at a time and
/// dispatch whatever writes come back; ownership guarantees no interleaving.
#[derive(Debug, Default)]
pub struct Reconciler {
    registry: DeviceRegistry,
    /// Fields with an unconfirmed local edit. Snapshot/push data never
    /// overwrites a guarded field until its write round-trip resolves.
    pending: HashSet<WriteKey>,
    scheduler: WriteScheduler,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn devices(&self) -> &[Device] {
        self.registry.devices()
    }

    /// Apply one event. The returned writes must be dispatched by the
    /// caller and their completions fed back as [`Event::WriteResolved`].
    pub fn apply(&mut self, event: Event) -> Applied {
        match event {
            Event::Snapshot(devices) => self.apply_snapshot(devices),
            Event::DeviceAdded(device) => self.apply_added(device),
            Event::DeviceRemoved(bus_info) => self.apply_removed(&bus_info),
            Event::StreamError { bus_info, errors } => self.apply_error(bus_info, errors),
            Event::LocalEdit { bus_info, edit } => self.apply_local_edit(&bus_info, edit),
            Event::WriteResolved { key, result } => self.apply_write_resolved(key, result),
            Event::ChannelDown => {
                log::info!("push channel down, clearing registry");
                self.registry.clear();
                self.pending.clear();
                self.scheduler.clear();
                Applied::default()
            }
            // ChannelUp triggers a snapshot fetch in the engine; Shutdown is
            // handled by the actor loop. Neither mutates state here.
            Event::ChannelUp | Event::Shutdown => Applied::default(),
        }
    }

    fn apply_snapshot(&mut self, devices: Vec<Device>) -> Applied {
        let mut applied = Applied::default();
        let mut seen: Vec<String> = Vec::new();

        for mut incoming in devices {
            if incoming.bus_info.is_empty() {
                log::warn!("snapshot entry missing bus_info, dropped");
                continue;
            }
            controls::normalize_controls(&mut incoming);
            seen.push(incoming.bus_info.clone());

            match self.registry.get_mut(&incoming.bus_info) {
                Some(existing) => Self::merge_into(&self.pending, existing, incoming),
                None => {
                    log::info!("device added by snapshot: {}", incoming.bus_info);
                    self.registry.insert(incoming);
                }
            }
        }

        let keep: Vec<&str> = seen.iter().map(String::as_str).collect();
        for id in self.registry.retain_ids(&keep) {
            log::info!("device removed by snapshot: {id}");
        }

        self.settle(&mut applied);
        applied
    }

    fn apply_added(&mut self, mut device: Device) -> Applied {
        let mut applied = Applied::default();
        if device.bus_info.is_empty() {
            log::warn!("device_added entry missing bus_info, dropped");
            return applied;
        }
        controls::normalize_controls(&mut device);

        match self.registry.get_mut(&device.bus_info) {
            // Re-announcing a known device is an update, not a duplicate.
            Some(existing) => Self::merge_into(&self.pending, existing, device),
            None => {
                log::info!("device added: {}", device.bus_info);
                self.registry.insert(device);
            }
        }

        self.settle(&mut applied);
        applied
    }

    /// Invariant pass after bulk/push data lands.
    ///
    /// Guarded pairings are re-asserted before healing runs: the pairing
    /// guard lives on the follower, so a stale snapshot can only desync the
    /// leader's back-reference, and `heal` would otherwise read that as a
    /// non-reciprocal pairing and tear down the guarded optimistic state.
    /// Hygiene fix-ups triggered by server data schedule confirmation
    /// writes like any other stream mutation.
    fn settle(&mut self, applied: &mut Applied) {
        self.reassert_guarded_pairings();
        pairing::heal(&mut self.registry);

        let fixed: Vec<String> = self
            .registry
            .iter_mut()
            .filter_map(|d| stream::sanitize(d).then(|| d.bus_info.clone()))
            .collect();
        for bus_info in fixed {
            self.submit_stream_write(applied, &bus_info);
        }
    }

    fn reassert_guarded_pairings(&mut self) {
        let guarded: Vec<String> = self
            .pending
            .iter()
            .filter(|key| key.concern == Concern::Pairing)
            .map(|key| key.bus_info.clone())
            .collect();
        for follower_id in guarded {
            let Some(leader_id) = self
                .registry
                .get(&follower_id)
                .and_then(|f| f.leader.clone())
            else {
                continue;
            };
            if let Some(leader) = self.registry.get_mut(&leader_id) {
                leader.follower = Some(follower_id);
            }
        }
    }

    fn apply_removed(&mut self, bus_info: &str) -> Applied {
        match self.registry.remove(bus_info) {
            Some(_) => {
                log::info!("device removed: {bus_info}");
                pairing::heal(&mut self.registry);
            }
            None => log::debug!("device_removed for unknown device {bus_info}"),
        }
        Applied::default()
    }

    /// A device-reported error is a state transition, not just a log line:
    /// the stream is disabled so dependent consumers see the device stopped.
    fn apply_error(&mut self, bus_info: String, errors: Vec<String>) -> Applied {
        let mut applied = Applied::default();
        match self.registry.get_mut(&bus_info) {
            Some(device) => {
                log::warn!("{bus_info}: stream errors reported, disabling: {errors:?}");
                device.stream.enabled = false;
                applied.notices.push(Notice::StreamError { bus_info, errors });
            }
            None => log::debug!("stream error for unknown device {bus_info}"),
        }
        applied
    }

    fn apply_local_edit(&mut self, bus_info: &str, edit: Edit) -> Applied {
        let mut applied = Applied::default();

        if !self.registry.contains(bus_info) {
            self.reject(&mut applied, bus_info, "unknown device");
            return applied;
        }

        match edit {
            Edit::SetNickname(nickname) => {
                if let Some(device) = self.registry.get_mut(bus_info) {
                    device.nickname = nickname.clone();
                }
                self.guard_submit(
                    &mut applied,
                    bus_info,
                    Concern::Nickname,
                    WritePayload::Nickname(nickname),
                );
            }

            Edit::SetControl { control_id, value } => {
                let Some(device) = self.registry.get_mut(bus_info) else {
                    return applied;
                };
                let Some(control) = device.control(control_id).cloned() else {
                    self.reject(&mut applied, bus_info, "unknown control");
                    return applied;
                };
                if controls::is_disabled(&control, device) {
                    self.reject(
                        &mut applied,
                        bus_info,
                        &format!("control '{}' is gated off", control.name),
                    );
                    return applied;
                }
                let value = control.constrain(value);
                if let Some(c) = device.control_mut(control_id) {
                    c.value = value;
                }
                self.guard_submit(
                    &mut applied,
                    bus_info,
                    Concern::Control(control_id),
                    WritePayload::ControlValue { control_id, value },
                );
            }

            Edit::SetStream(config) => {
                if let Some(device) = self.registry.get_mut(bus_info) {
                    device.stream = config;
                    stream::sanitize(device);
                }
                self.submit_stream_write(&mut applied, bus_info);
            }

            Edit::AddEndpoint(endpoint) => {
                let Some(device) = self.registry.get_mut(bus_info) else {
                    return applied;
                };
                if !stream::can_add_endpoint(&device.stream) {
                    self.reject(
                        &mut applied,
                        bus_info,
                        "an RTMP endpoint without a target URL is already present",
                    );
                    return applied;
                }
                device.stream.endpoints.push(endpoint);
                stream::sanitize(device);
                self.submit_stream_write(&mut applied, bus_info);
            }

            Edit::RemoveEndpoint(index) => {
                let Some(device) = self.registry.get_mut(bus_info) else {
                    return applied;
                };
                if index >= device.stream.endpoints.len() {
                    self.reject(&mut applied, bus_info, "endpoint index out of range");
                    return applied;
                }
                device.stream.endpoints.remove(index);
                stream::sanitize(device);
                self.submit_stream_write(&mut applied, bus_info);
            }

            Edit::ReplaceEndpoint(index, endpoint) => {
                let Some(device) = self.registry.get_mut(bus_info) else {
                    return applied;
                };
                if index >= device.stream.endpoints.len() {
                    self.reject(&mut applied, bus_info, "endpoint index out of range");
                    return applied;
                }
                device.stream.endpoints[index] = endpoint;
                stream::sanitize(device);
                self.submit_stream_write(&mut applied, bus_info);
            }

            Edit::SetEnabled(enabled) => {
                let (is_managed, has_follower) = match self.registry.get(bus_info) {
                    Some(d) => (d.is_managed, d.follower.is_some()),
                    None => return applied,
                };
                if is_managed {
                    self.reject(&mut applied, bus_info, "stream is driven by a leader");
                    return applied;
                }
                if let Some(device) = self.registry.get_mut(bus_info) {
                    device.stream.enabled = enabled;
                }
                // Leader toggles mirror onto the follower inside this same
                // mutation; the follower side needs no extra round-trip.
                if has_follower {
                    pairing::cascade_enabled(&mut self.registry, bus_info, enabled);
                }
                self.submit_stream_write(&mut applied, bus_info);
            }

            Edit::SetStreamType(stream_type) => {
                if let Some(device) = self.registry.get_mut(bus_info) {
                    device.stream.stream_type = stream_type;
                    stream::sanitize(device);
                }
                self.submit_stream_write(&mut applied, bus_info);
            }

            Edit::ToggleRecording => {
                if let Some(device) = self.registry.get_mut(bus_info) {
                    stream::toggle_recording(&mut device.stream);
                }
                self.submit_stream_write(&mut applied, bus_info);
            }

            Edit::AssignLeader { leader } => {
                match pairing::assign_leader(&mut self.registry, &leader, bus_info) {
                    Ok(()) => self.guard_submit(
                        &mut applied,
                        bus_info,
                        Concern::Pairing,
                        WritePayload::SetLeader { leader },
                    ),
                    Err(e) => self.reject(&mut applied, bus_info, &e.to_string()),
                }
            }

            Edit::ClearLeader => match pairing::clear_leader(&mut self.registry, bus_info) {
                Ok(()) => self.guard_submit(
                    &mut applied,
                    bus_info,
                    Concern::Pairing,
                    WritePayload::RemoveLeader,
                ),
                Err(e) => self.reject(&mut applied, bus_info, &e.to_string()),
            },

            Edit::SetSyncGroup(group) => {
                if let Some(device) = self.registry.get_mut(bus_info) {
                    device.sync_group = Some(group.clone());
                }
                self.guard_submit(
                    &mut applied,
                    bus_info,
                    Concern::SyncGroup,
                    WritePayload::SyncGroup(group),
                );
            }

            Edit::ResetControls => {
                let changed = match self.registry.get_mut(bus_info) {
                    Some(device) => device.reset_controls_to_default(),
                    None => return applied,
                };
                for (control_id, value) in changed {
                    self.guard_submit(
                        &mut applied,
                        bus_info,
                        Concern::Control(control_id),
                        WritePayload::ControlValue { control_id, value },
                    );
                }
            }
        }

        applied
    }

    fn apply_write_resolved(&mut self, key: WriteKey, result: Result<(), String>) -> Applied {
        let mut applied = Applied::default();

        if let Err(error) = result {
            // The optimistic local value is deliberately kept; the notice is
            // the only signal that the intent did not persist.
            log::warn!("confirmation write failed for {key:?}: {error}");
            applied
                .notices
                .push(Notice::WriteFailed { key: key.clone(), error });
        }

        match self.scheduler.resolve(&key) {
            // A newer edit queued behind this write; keep the guard up.
            Some(next) => applied.writes.push(next),
            None => {
                self.pending.remove(&key);
            }
        }
        applied
    }

    /// Per-field merge of fresh backend data into a known device. Fields
    /// with an unconfirmed local edit keep their optimistic value; local
    /// intent wins over stale reads for the duration of one write.
    fn merge_into(pending: &HashSet<WriteKey>, existing: &mut Device, mut incoming: Device) {
        let bus_info = existing.bus_info.clone();
        let guarded =
            |concern: Concern| pending.contains(&WriteKey::new(bus_info.clone(), concern));

        if guarded(Concern::Nickname) {
            incoming.nickname = existing.nickname.clone();
        }
        if guarded(Concern::Stream) {
            incoming.stream = existing.stream.clone();
        }
        if guarded(Concern::SyncGroup) {
            incoming.sync_group = existing.sync_group.clone();
        }
        if guarded(Concern::Pairing) {
            incoming.leader = existing.leader.clone();
            incoming.follower = existing.follower.clone();
            incoming.is_managed = existing.is_managed;
        }
        for control in &mut incoming.controls {
            if guarded(Concern::Control(control.control_id)) {
                if let Some(local) = existing.control(control.control_id) {
                    control.value = local.value;
                }
            }
        }

        *existing = incoming;
    }

    fn guard_submit(
        &mut self,
        applied: &mut Applied,
        bus_info: &str,
        concern: Concern,
        payload: WritePayload,
    ) {
        let key = WriteKey::new(bus_info, concern);
        self.pending.insert(key.clone());
        if let Some(dispatch) = self.scheduler.submit(key, payload) {
            applied.writes.push(dispatch);
        }
    }

    /// Schedule a confirmation write carrying the full resolved stream
    /// config, as every successful stream/endpoint mutation must.
    fn submit_stream_write(&mut self, applied: &mut Applied, bus_info: &str) {
        let Some(config) = self.registry.get(bus_info).map(|d| d.stream.clone()) else {
            return;
        };
        self.guard_submit(applied, bus_info, Concern::Stream, WritePayload::Stream(config));
    }

    fn reject(&self, applied: &mut Applied, bus_info: &str, reason: &str) {
        log::warn!("{bus_info}: edit rejected: {reason}");
        applied.notices.push(Notice::EditRejected {
            bus_info: bus_info.to_string(),
            reason: reason.to_string(),
        });
    }
}

// ── Engine actor ─────────────────────────────────────────────────────────────

/// Cloneable handle for feeding events to a running [`SyncEngine`] and
/// observing the device view it publishes.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Event>,
    devices: watch::Receiver<Vec<Device>>,
}

impl EngineHandle {
    /// Send an event to the engine. Returns `false` if it has shut down.
    pub async fn send(&self, event: Event) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub async fn edit(&self, bus_info: impl Into<String>, edit: Edit) -> bool {
        self.send(Event::LocalEdit { bus_info: bus_info.into(), edit }).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Event::Shutdown).await;
    }

    /// Watch channel carrying the device view, republished after every
    /// applied event.
    pub fn devices(&self) -> watch::Receiver<Vec<Device>> {
        self.devices.clone()
    }
}

/// The actor that owns the reconciler and runs the event loop.
///
/// All registry mutations happen on this task, one event at a time,
/// including every cascading invariant fix-up. Outbound writes are spawned
/// and their completions re-enter the mailbox, so no lock is ever held
/// across a network call.
pub struct SyncEngine<B> {
    reconciler: Reconciler,
    backend: Arc<B>,
    rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    devices_tx: watch::Sender<Vec<Device>>,
    notices: Option<mpsc::Sender<Notice>>,
    poll_interval: Duration,
}

impl<B> SyncEngine<B>
where
    B: Backend + WriteHandler + 'static,
{
    pub fn new(backend: Arc<B>, poll_interval: Duration) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (devices_tx, devices_rx) = watch::channel(Vec::new());
        let handle = EngineHandle { tx: tx.clone(), devices: devices_rx };
        let engine = Self {
            reconciler: Reconciler::new(),
            backend,
            rx,
            tx,
            devices_tx,
            notices: None,
            poll_interval,
        };
        (engine, handle)
    }

    /// Forward notices (stream errors, failed writes, rejected edits) to
    /// the given channel.
    pub fn with_notices(mut self, notices: mpsc::Sender<Notice>) -> Self {
        self.notices = Some(notices);
        self
    }

    /// Main run loop. Call from a spawned tokio task.
    ///
    /// Waits on the mailbox and a periodic snapshot re-poll. The poll backs
    /// up the push channel: a missed push event is corrected by the next
    /// authoritative snapshot merge.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        // The first tick fires immediately; skip it, the transport's
        // ChannelUp drives the initial snapshot fetch.
        ticker.tick().await;

        log::info!(
            "sync engine started (snapshot poll interval: {}s)",
            self.poll_interval.as_secs()
        );

        loop {
            tokio::select! {
                maybe_event = self.rx.recv() => {
                    match maybe_event {
                        None | Some(Event::Shutdown) => break,
                        Some(Event::ChannelUp) => self.refresh_snapshot().await,
                        Some(event) => self.process(event),
                    }
                }
                _ = ticker.tick() => {
                    self.refresh_snapshot().await;
                }
            }
        }

        log::info!("sync engine stopped");
    }

    fn process(&mut self, event: Event) {
        let applied = self.reconciler.apply(event);
        for (key, payload) in applied.writes {
            self.dispatch(key, payload);
        }
        if let Some(notices) = &self.notices {
            for notice in applied.notices {
                let _ = notices.try_send(notice);
            }
        }
        let _ = self.devices_tx.send(self.reconciler.devices().to_vec());
    }

    /// Spawn one confirmation write; its completion re-enters the mailbox.
    fn dispatch(&self, key: WriteKey, payload: WritePayload) {
        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = backend.dispatch(key.clone(), payload).await;
            let _ = tx.send(Event::WriteResolved { key, result }).await;
        });
    }

    async fn refresh_snapshot(&mut self) {
        match self.backend.fetch_devices().await {
            Ok(devices) => {
                log::debug!("snapshot fetched: {} devices", devices.len());
                self.process(Event::Snapshot(devices));
            }
            Err(e) => {
                let message = e.to_string();
                if is_network_error(&message) {
                    log::warn!("snapshot fetch failed, backend unreachable: {message}");
                } else {
                    log::warn!("snapshot fetch failed: {message}");
                }
            }
        }
    }
}

/// Heuristic check for network-level errors vs application errors.
pub fn is_network_error(error: &str) -> bool {
    let network_patterns = [
        "dns error",
        "connect error",
        "connection refused",
        "network unreachable",
        "timed out",
        "timeout",
        "no route to host",
        "network is down",
        "couldn't resolve host",
    ];
    let lower = error.to_lowercase();
    network_patterns.iter().any(|p| lower.contains(p))
}
