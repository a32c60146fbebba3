//! Data model for the camera fleet.
//!
//! Every entity here mirrors the backend's JSON wire format (snake_case
//! fields, enum wire names like `MJPG` and `SOFTWARE_H264`). The registry
//! owns all of it; cross-device links are `bus_info` strings, never object
//! references.

pub mod controls;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Encoder preference order used when a forced format change has to pick a
/// replacement (e.g. dropping MJPG for an RTMP relay).
pub const ENCODER_PREFERENCE: [EncodeType; 3] = [
    EncodeType::H264,
    EncodeType::SoftwareH264,
    EncodeType::Mjpg,
];

/// Stream encoder supported by the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncodeType {
    #[serde(rename = "MJPG")]
    Mjpg,
    #[serde(rename = "H264")]
    H264,
    #[serde(rename = "SOFTWARE_H264")]
    SoftwareH264,
}

impl EncodeType {
    /// Wire name, also the key used in capability format maps.
    pub fn wire_name(self) -> &'static str {
        match self {
            EncodeType::Mjpg => "MJPG",
            EncodeType::H264 => "H264",
            EncodeType::SoftwareH264 => "SOFTWARE_H264",
        }
    }
}

/// Where a device's stream goes: UDP fan-out, RTMP relay, or local recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamType {
    Udp,
    Rtmp,
    Recording,
}

/// Device classification. The wire format is the backend's integer enum;
/// leader/follower "pro" variants collapse onto their base capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum DeviceKind {
    /// Directly controllable device with no pairing capability.
    Plain,
    /// May drive the stream of a paired follower.
    Leader,
    /// May have its stream driven by a paired leader.
    Follower,
}

impl From<u8> for DeviceKind {
    fn from(raw: u8) -> Self {
        match raw {
            1 | 3 => DeviceKind::Leader,
            2 | 4 => DeviceKind::Follower,
            _ => DeviceKind::Plain,
        }
    }
}

impl From<DeviceKind> for u8 {
    fn from(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Plain => 0,
            DeviceKind::Leader => 1,
            DeviceKind::Follower => 2,
        }
    }
}

/// Frame interval as a rational (1/30 = 30 fps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub numerator: u32,
    pub denominator: u32,
}

/// One destination for a stream. An endpoint is either a plain UDP target or
/// an RTMP relay target, never both; the enum makes mixed payloads
/// unrepresentable per endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Endpoint {
    Udp { host: String, port: u16 },
    Rtmp { rtmp_url: String },
}

impl Endpoint {
    pub fn is_udp(&self) -> bool {
        matches!(self, Endpoint::Udp { .. })
    }

    pub fn is_rtmp(&self) -> bool {
        matches!(self, Endpoint::Rtmp { .. })
    }

    /// Port of a UDP endpoint, `None` for RTMP targets.
    pub fn udp_port(&self) -> Option<u16> {
        match self {
            Endpoint::Udp { port, .. } => Some(*port),
            Endpoint::Rtmp { .. } => None,
        }
    }
}

/// V4L-style control type. Only INTEGER, BOOLEAN and MENU are dispatchable;
/// everything else is filtered out before a device enters the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlType {
    Integer,
    Boolean,
    Menu,
    Button,
    Integer64,
    CtrlClass,
    String,
    Bitmask,
    IntegerMenu,
}

impl ControlType {
    pub fn is_dispatchable(self) -> bool {
        matches!(
            self,
            ControlType::Integer | ControlType::Boolean | ControlType::Menu
        )
    }
}

/// One entry of a MENU control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub index: u32,
    pub name: String,
}

/// Value constraints and type information for a control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlFlags {
    pub control_type: ControlType,
    pub default_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub step: f64,
    #[serde(default)]
    pub menu: Vec<MenuItem>,
}

/// One adjustable camera parameter (exposure, gain, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub control_id: u32,
    pub name: String,
    pub value: f64,
    pub flags: ControlFlags,
}

impl Control {
    /// Clamp to the control's range and snap to its step grid, the same way
    /// the operator-facing slider commits values.
    pub fn constrain(&self, value: f64) -> f64 {
        let clamped = value.clamp(self.flags.min_value, self.flags.max_value);
        if self.flags.step <= 0.0 {
            return clamped;
        }
        let steps = ((clamped - self.flags.min_value) / self.flags.step).round();
        (steps * self.flags.step + self.flags.min_value)
            .clamp(self.flags.min_value, self.flags.max_value)
    }
}

/// Supported (resolution, frame-interval) pairs for one encoding format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatSize {
    pub width: u32,
    pub height: u32,
    pub intervals: Vec<Interval>,
}

/// Capability descriptor for one physical sensor path. Read-only, supplied
/// by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCapability {
    pub path: String,
    pub formats: HashMap<String, Vec<FormatSize>>,
}

/// One device's streaming/recording configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub encode_type: EncodeType,
    pub width: u32,
    pub height: u32,
    pub interval: Interval,
    #[serde(default)]
    pub enabled: bool,
    pub stream_type: StreamType,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

/// One physical or virtual camera unit.
///
/// `bus_info` is the stable identity; it is unique within the registry and
/// immutable for the device's lifetime. `leader`/`follower` are non-owning
/// back-references by `bus_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub bus_info: String,
    pub device_type: DeviceKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub controls: Vec<Control>,
    pub stream: StreamConfig,
    #[serde(default)]
    pub cameras: Vec<CameraCapability>,
    #[serde(default)]
    pub leader: Option<String>,
    #[serde(default)]
    pub follower: Option<String>,
    #[serde(default)]
    pub is_managed: bool,
    #[serde(default)]
    pub sync_group: Option<String>,
}

impl Device {
    pub fn control(&self, control_id: u32) -> Option<&Control> {
        self.controls.iter().find(|c| c.control_id == control_id)
    }

    pub fn control_mut(&mut self, control_id: u32) -> Option<&mut Control> {
        self.controls.iter_mut().find(|c| c.control_id == control_id)
    }

    pub fn control_by_name(&self, name: &str) -> Option<&Control> {
        self.controls.iter().find(|c| c.name == name)
    }

    /// Encoders this device can actually produce, in preference order,
    /// derived from the capability format maps.
    pub fn supported_encoders(&self) -> Vec<EncodeType> {
        ENCODER_PREFERENCE
            .iter()
            .copied()
            .filter(|enc| {
                self.cameras
                    .iter()
                    .any(|cam| cam.formats.contains_key(enc.wire_name()))
            })
            .collect()
    }

    /// Distinct (width, height) pairs available for an encoder, in
    /// capability order.
    pub fn resolutions_for(&self, encode_type: EncodeType) -> Vec<(u32, u32)> {
        let mut out: Vec<(u32, u32)> = Vec::new();
        for camera in &self.cameras {
            if let Some(sizes) = camera.formats.get(encode_type.wire_name()) {
                for size in sizes {
                    if !out.contains(&(size.width, size.height)) {
                        out.push((size.width, size.height));
                    }
                }
            }
        }
        out
    }

    /// Distinct frame intervals available for an encoder.
    pub fn frame_intervals_for(&self, encode_type: EncodeType) -> Vec<Interval> {
        let mut out: Vec<Interval> = Vec::new();
        for camera in &self.cameras {
            if let Some(sizes) = camera.formats.get(encode_type.wire_name()) {
                for size in sizes {
                    for interval in &size.intervals {
                        if !out.contains(interval) {
                            out.push(*interval);
                        }
                    }
                }
            }
        }
        out
    }

    /// Reset every dispatchable control to its default value. Returns the
    /// (control_id, value) pairs that actually changed, so the caller can
    /// schedule the matching confirmation writes.
    pub fn reset_controls_to_default(&mut self) -> Vec<(u32, f64)> {
        let mut changed = Vec::new();
        for control in &mut self.controls {
            if !control.flags.control_type.is_dispatchable() {
                continue;
            }
            if control.value != control.flags.default_value {
                control.value = control.flags.default_value;
                changed.push((control.control_id, control.value));
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_kind_collapses_pro_variants() {
        assert_eq!(DeviceKind::from(0), DeviceKind::Plain);
        assert_eq!(DeviceKind::from(1), DeviceKind::Leader);
        assert_eq!(DeviceKind::from(2), DeviceKind::Follower);
        assert_eq!(DeviceKind::from(3), DeviceKind::Leader);
        assert_eq!(DeviceKind::from(4), DeviceKind::Follower);
        assert_eq!(DeviceKind::from(99), DeviceKind::Plain);
    }

    #[test]
    fn endpoint_untagged_wire_format() {
        let udp: Endpoint =
            serde_json::from_str(r#"{"host": "192.168.2.1", "port": 5600}"#).unwrap();
        assert_eq!(udp.udp_port(), Some(5600));

        let rtmp: Endpoint =
            serde_json::from_str(r#"{"rtmp_url": "rtmp://relay.example/live"}"#).unwrap();
        assert!(rtmp.is_rtmp());
        assert_eq!(rtmp.udp_port(), None);
    }

    #[test]
    fn encode_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&EncodeType::SoftwareH264).unwrap(),
            "\"SOFTWARE_H264\""
        );
        let parsed: EncodeType = serde_json::from_str("\"MJPG\"").unwrap();
        assert_eq!(parsed, EncodeType::Mjpg);
    }

    #[test]
    fn constrain_clamps_and_snaps() {
        let control = Control {
            control_id: 1,
            name: "Gain".to_string(),
            value: 0.0,
            flags: ControlFlags {
                control_type: ControlType::Integer,
                default_value: 0.0,
                min_value: 0.0,
                max_value: 100.0,
                step: 5.0,
                menu: vec![],
            },
        };
        assert_eq!(control.constrain(12.0), 10.0);
        assert_eq!(control.constrain(13.0), 15.0);
        assert_eq!(control.constrain(250.0), 100.0);
        assert_eq!(control.constrain(-3.0), 0.0);
    }
}
