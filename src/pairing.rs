//! Leader/follower pairing across devices.
//!
//! A leader-capable device may drive the stream of exactly one
//! follower-capable device. Pairings are stored as `bus_info` back-references
//! through the registry, never as object references, so removal and
//! serialization stay simple. `heal` is the self-healing pass run after
//! every registry mutation; it tears down any half-open pairing.

use thiserror::Error;

use crate::device::DeviceKind;
use crate::registry::DeviceRegistry;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairingError {
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("{0} is not leader-capable")]
    NotLeaderCapable(String),
    #[error("{0} is not follower-capable")]
    NotFollowerCapable(String),
    #[error("a device cannot follow itself")]
    SelfPairing,
}

/// Pair `follower_id` under `leader_id`.
///
/// Existing pairings on either side are torn down first, so the outcome is
/// deterministic regardless of prior state. The follower becomes managed and
/// mirrors the leader's current `stream.enabled`.
pub fn assign_leader(
    registry: &mut DeviceRegistry,
    leader_id: &str,
    follower_id: &str,
) -> Result<(), PairingError> {
    if leader_id == follower_id {
        return Err(PairingError::SelfPairing);
    }

    let leader = registry
        .get(leader_id)
        .ok_or_else(|| PairingError::NotFound(leader_id.to_string()))?;
    if leader.device_type != DeviceKind::Leader {
        return Err(PairingError::NotLeaderCapable(leader_id.to_string()));
    }
    let follower = registry
        .get(follower_id)
        .ok_or_else(|| PairingError::NotFound(follower_id.to_string()))?;
    if follower.device_type != DeviceKind::Follower {
        return Err(PairingError::NotFollowerCapable(follower_id.to_string()));
    }

    // Teardown-then-reassign: drop whatever either side was paired with.
    let old_follower = leader.follower.clone();
    let old_leader = follower.leader.clone();
    if let Some(id) = old_follower {
        detach_follower(registry, &id);
    }
    if let Some(id) = old_leader {
        detach_leader(registry, &id);
    }

    let enabled = registry
        .get(leader_id)
        .map(|l| l.stream.enabled)
        .unwrap_or(false);

    if let Some(leader) = registry.get_mut(leader_id) {
        leader.follower = Some(follower_id.to_string());
    }
    if let Some(follower) = registry.get_mut(follower_id) {
        follower.leader = Some(leader_id.to_string());
        follower.is_managed = true;
        follower.stream.enabled = enabled;
    }

    log::info!("paired follower {follower_id} under leader {leader_id}");
    Ok(())
}

/// Clear the pairing on `follower_id`, detaching the leader side too.
/// Idempotent: clearing an unpaired follower is a no-op.
pub fn clear_leader(
    registry: &mut DeviceRegistry,
    follower_id: &str,
) -> Result<(), PairingError> {
    let follower = registry
        .get(follower_id)
        .ok_or_else(|| PairingError::NotFound(follower_id.to_string()))?;

    let Some(leader_id) = follower.leader.clone() else {
        return Ok(());
    };
    detach_leader(registry, &leader_id);
    detach_follower(registry, follower_id);
    log::info!("cleared leader {leader_id} from follower {follower_id}");
    Ok(())
}

/// Mirror a leader's `stream.enabled` onto its follower. Called inside the
/// same mutation that toggled the leader, so the cascade is atomic from the
/// perspective of any reader.
pub fn cascade_enabled(registry: &mut DeviceRegistry, leader_id: &str, enabled: bool) {
    let Some(follower_id) = registry.get(leader_id).and_then(|l| l.follower.clone()) else {
        return;
    };
    if let Some(follower) = registry.get_mut(&follower_id) {
        follower.stream.enabled = enabled;
    }
}

/// Tear down pairings left dangling by device removal or a stale snapshot.
/// Returns `true` when anything was repaired.
pub fn heal(registry: &mut DeviceRegistry) -> bool {
    let mut repaired = false;

    // Followers pointing at a missing or non-reciprocal leader.
    let stale_followers: Vec<String> = registry
        .iter()
        .filter(|d| {
            d.leader.as_ref().is_some_and(|leader_id| {
                registry
                    .get(leader_id)
                    .map(|l| l.follower.as_deref() != Some(d.bus_info.as_str()))
                    .unwrap_or(true)
            })
        })
        .map(|d| d.bus_info.clone())
        .collect();
    for id in stale_followers {
        log::info!("{id}: leader vanished, detaching");
        detach_follower(registry, &id);
        repaired = true;
    }

    // Leaders pointing at a missing or non-reciprocal follower.
    let stale_leaders: Vec<String> = registry
        .iter()
        .filter(|d| {
            d.follower.as_ref().is_some_and(|follower_id| {
                registry
                    .get(follower_id)
                    .map(|f| f.leader.as_deref() != Some(d.bus_info.as_str()))
                    .unwrap_or(true)
            })
        })
        .map(|d| d.bus_info.clone())
        .collect();
    for id in stale_leaders {
        log::info!("{id}: follower vanished, detaching");
        detach_leader(registry, &id);
        repaired = true;
    }

    repaired
}

fn detach_follower(registry: &mut DeviceRegistry, follower_id: &str) {
    if let Some(follower) = registry.get_mut(follower_id) {
        follower.leader = None;
        follower.is_managed = false;
    }
}

fn detach_leader(registry: &mut DeviceRegistry, leader_id: &str) {
    if let Some(leader) = registry.get_mut(leader_id) {
        leader.follower = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{
        Device, DeviceKind, EncodeType, Interval, StreamConfig, StreamType,
    };

    fn device(bus_info: &str, kind: DeviceKind) -> Device {
        Device {
            bus_info: bus_info.to_string(),
            device_type: kind,
            name: None,
            manufacturer: None,
            nickname: String::new(),
            controls: vec![],
            stream: StreamConfig {
                encode_type: EncodeType::H264,
                width: 1920,
                height: 1080,
                interval: Interval { numerator: 1, denominator: 30 },
                enabled: false,
                stream_type: StreamType::Udp,
                endpoints: vec![],
            },
            cameras: vec![],
            leader: None,
            follower: None,
            is_managed: false,
            sync_group: None,
        }
    }

    fn registry_with_pair() -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        registry.insert(device("leader-1", DeviceKind::Leader));
        registry.insert(device("follower-1", DeviceKind::Follower));
        registry
    }

    #[test]
    fn assign_sets_both_sides_and_manages_follower() {
        let mut registry = registry_with_pair();
        registry.get_mut("leader-1").unwrap().stream.enabled = true;

        assign_leader(&mut registry, "leader-1", "follower-1").unwrap();

        let leader = registry.get("leader-1").unwrap();
        let follower = registry.get("follower-1").unwrap();
        assert_eq!(leader.follower.as_deref(), Some("follower-1"));
        assert_eq!(follower.leader.as_deref(), Some("leader-1"));
        assert!(follower.is_managed);
        // Mirrors the leader's current enabled state.
        assert!(follower.stream.enabled);
    }

    #[test]
    fn assign_rejects_wrong_capabilities() {
        let mut registry = DeviceRegistry::new();
        registry.insert(device("plain-1", DeviceKind::Plain));
        registry.insert(device("follower-1", DeviceKind::Follower));
        registry.insert(device("leader-1", DeviceKind::Leader));

        assert_eq!(
            assign_leader(&mut registry, "plain-1", "follower-1"),
            Err(PairingError::NotLeaderCapable("plain-1".to_string()))
        );
        assert_eq!(
            assign_leader(&mut registry, "leader-1", "plain-1"),
            Err(PairingError::NotFollowerCapable("plain-1".to_string()))
        );
        assert_eq!(
            assign_leader(&mut registry, "leader-1", "leader-1"),
            Err(PairingError::SelfPairing)
        );
        assert_eq!(
            assign_leader(&mut registry, "leader-1", "ghost"),
            Err(PairingError::NotFound("ghost".to_string()))
        );
    }

    #[test]
    fn reassign_tears_down_previous_pairing() {
        let mut registry = registry_with_pair();
        registry.insert(device("follower-2", DeviceKind::Follower));
        assign_leader(&mut registry, "leader-1", "follower-1").unwrap();

        assign_leader(&mut registry, "leader-1", "follower-2").unwrap();

        let old = registry.get("follower-1").unwrap();
        assert_eq!(old.leader, None);
        assert!(!old.is_managed);
        assert_eq!(
            registry.get("leader-1").unwrap().follower.as_deref(),
            Some("follower-2")
        );
    }

    #[test]
    fn follower_cannot_serve_two_leaders() {
        let mut registry = registry_with_pair();
        registry.insert(device("leader-2", DeviceKind::Leader));
        assign_leader(&mut registry, "leader-1", "follower-1").unwrap();

        assign_leader(&mut registry, "leader-2", "follower-1").unwrap();

        assert_eq!(registry.get("leader-1").unwrap().follower, None);
        assert_eq!(
            registry.get("follower-1").unwrap().leader.as_deref(),
            Some("leader-2")
        );
    }

    #[test]
    fn clear_is_symmetric_and_idempotent() {
        let mut registry = registry_with_pair();
        assign_leader(&mut registry, "leader-1", "follower-1").unwrap();

        clear_leader(&mut registry, "follower-1").unwrap();
        let follower = registry.get("follower-1").unwrap();
        assert_eq!(follower.leader, None);
        assert!(!follower.is_managed);
        assert_eq!(registry.get("leader-1").unwrap().follower, None);

        // Second clear is a no-op.
        clear_leader(&mut registry, "follower-1").unwrap();
    }

    #[test]
    fn cascade_mirrors_enabled_onto_follower() {
        let mut registry = registry_with_pair();
        assign_leader(&mut registry, "leader-1", "follower-1").unwrap();

        registry.get_mut("leader-1").unwrap().stream.enabled = true;
        cascade_enabled(&mut registry, "leader-1", true);
        assert!(registry.get("follower-1").unwrap().stream.enabled);

        registry.get_mut("leader-1").unwrap().stream.enabled = false;
        cascade_enabled(&mut registry, "leader-1", false);
        assert!(!registry.get("follower-1").unwrap().stream.enabled);
    }

    #[test]
    fn heal_detaches_follower_after_leader_removal() {
        let mut registry = registry_with_pair();
        assign_leader(&mut registry, "leader-1", "follower-1").unwrap();

        registry.remove("leader-1");
        assert!(heal(&mut registry));

        let follower = registry.get("follower-1").unwrap();
        assert_eq!(follower.leader, None);
        assert!(!follower.is_managed);
    }

    #[test]
    fn heal_detaches_leader_after_follower_removal() {
        let mut registry = registry_with_pair();
        assign_leader(&mut registry, "leader-1", "follower-1").unwrap();

        registry.remove("follower-1");
        assert!(heal(&mut registry));
        assert_eq!(registry.get("leader-1").unwrap().follower, None);
    }

    #[test]
    fn heal_on_consistent_registry_is_noop() {
        let mut registry = registry_with_pair();
        assign_leader(&mut registry, "leader-1", "follower-1").unwrap();
        assert!(!heal(&mut registry));
    }
}
