//! Outbound confirmation-write scheduling.
//!
//! At most one write is in flight per (device, concern) pair. A newer edit
//! to the same concern supersedes the queued payload, so the backend always
//! receives the operator's latest intent and never a storm of intermediate
//! values. The scheduler is a pure state machine; the engine owns the actual
//! dispatching.

use std::collections::HashMap;
use std::future::Future;

use crate::device::StreamConfig;

/// A logical category of editable device state. Write serialization is
/// scoped per concern, so e.g. a nickname write never queues behind a slow
/// stream reconfiguration. Control values are scoped per control id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concern {
    Nickname,
    Control(u32),
    Stream,
    Pairing,
    SyncGroup,
}

/// Identifies one logical write stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WriteKey {
    pub bus_info: String,
    pub concern: Concern,
}

impl WriteKey {
    pub fn new(bus_info: impl Into<String>, concern: Concern) -> Self {
        Self { bus_info: bus_info.into(), concern }
    }
}

/// Payload of one confirmation write.
#[derive(Debug, Clone, PartialEq)]
pub enum WritePayload {
    Nickname(String),
    ControlValue { control_id: u32, value: f64 },
    Stream(StreamConfig),
    SetLeader { leader: String },
    RemoveLeader,
    SyncGroup(String),
}

/// Dispatches one confirmation write to the backend.
///
/// In production the API client implements this over HTTP. Tests use mock
/// implementations that control success and failure.
pub trait WriteHandler: Send + Sync {
    fn dispatch(
        &self,
        key: WriteKey,
        payload: WritePayload,
    ) -> impl Future<Output = Result<(), String>> + Send;
}

#[derive(Debug, Default)]
struct Slot {
    in_flight: bool,
    queued: Option<WritePayload>,
}

/// Per-key write serialization with latest-wins supersession.
#[derive(Debug, Default)]
pub struct WriteScheduler {
    slots: HashMap<WriteKey, Slot>,
}

impl WriteScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a payload for `key`. Returns the payload the caller must
    /// dispatch now, or `None` when a write for this key is already in
    /// flight (the payload is queued and supersedes any earlier queued one).
    pub fn submit(&mut self, key: WriteKey, payload: WritePayload) -> Option<(WriteKey, WritePayload)> {
        let slot = self.slots.entry(key.clone()).or_default();
        if slot.in_flight {
            if slot.queued.is_some() {
                log::debug!("superseding queued write for {key:?}");
            }
            slot.queued = Some(payload);
            return None;
        }
        slot.in_flight = true;
        Some((key, payload))
    }

    /// Record completion of the in-flight write for `key`. Returns the next
    /// payload to dispatch if an edit was queued meanwhile; otherwise the
    /// slot is released.
    pub fn resolve(&mut self, key: &WriteKey) -> Option<(WriteKey, WritePayload)> {
        let slot = self.slots.get_mut(key)?;
        match slot.queued.take() {
            Some(next) => Some((key.clone(), next)),
            None => {
                self.slots.remove(key);
                None
            }
        }
    }

    pub fn is_in_flight(&self, key: &WriteKey) -> bool {
        self.slots.get(key).map(|s| s.in_flight).unwrap_or(false)
    }

    /// Number of keys with an in-flight or queued write.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop all scheduling state. Used when the push channel disconnects and
    /// the registry is cleared; completions for forgotten keys are ignored
    /// by `resolve`.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
