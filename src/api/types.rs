//! Request/response payloads for the backend REST API.
//!
//! All payloads serialize as snake_case JSON, matching the backend schema.

use serde::{Deserialize, Serialize};

use crate::device::{EncodeType, Endpoint, Interval, StreamType};

/// Resolution and frame interval part of a stream configuration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub interval: Interval,
}

/// Body of `POST /devices/configure_stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub bus_info: String,
    pub stream_format: StreamFormat,
    pub encode_type: EncodeType,
    pub stream_type: StreamType,
    pub endpoints: Vec<Endpoint>,
}

/// Body of `POST /devices/set_uvc_control`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UvcControl {
    pub bus_info: String,
    pub control_id: u32,
    pub value: f64,
}

/// Body of `POST /devices/set_nickname`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceNickname {
    pub bus_info: String,
    pub nickname: String,
}

/// Body of `POST /devices/set_sync_group`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncGroupAssignment {
    pub bus_info: String,
    pub sync_group: String,
}

/// Body of `POST /devices/set_leader`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderAssignment {
    pub leader: String,
    pub follower: String,
}

/// Body of `POST /devices/remove_leader` and `POST /devices/restart_stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSelector {
    pub bus_info: String,
}

/// Response of `GET /preferences/get_recommended_host`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecommendedHost {
    pub host: String,
}

/// Generic mutation acknowledgement from the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestStatus {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Default target for newly created UDP endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultStream {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "192.168.2.1".to_string()
}

fn default_port() -> u16 {
    5600
}

impl Default for DefaultStream {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

/// Operator preferences stored on the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub default_stream: DefaultStream,
    #[serde(default = "default_true")]
    pub suggest_host: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self { default_stream: DefaultStream::default(), suggest_host: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_info_serializes_snake_case() {
        let info = StreamInfo {
            bus_info: "usb-1".to_string(),
            stream_format: StreamFormat {
                width: 1920,
                height: 1080,
                interval: Interval { numerator: 1, denominator: 30 },
            },
            encode_type: EncodeType::H264,
            stream_type: StreamType::Udp,
            endpoints: vec![Endpoint::Udp { host: "192.168.2.1".to_string(), port: 5600 }],
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["bus_info"], "usb-1");
        assert_eq!(json["stream_format"]["width"], 1920);
        assert_eq!(json["encode_type"], "H264");
        assert_eq!(json["stream_type"], "UDP");
        assert_eq!(json["endpoints"][0]["port"], 5600);
    }

    #[test]
    fn recommended_host_decodes_from_object() {
        let recommended: RecommendedHost =
            serde_json::from_str(r#"{"host": "192.168.2.1"}"#).unwrap();
        assert_eq!(recommended.host, "192.168.2.1");
    }

    #[test]
    fn preferences_fill_defaults() {
        let prefs: Preferences = serde_json::from_str("{}").unwrap();
        assert_eq!(prefs.default_stream.host, "192.168.2.1");
        assert_eq!(prefs.default_stream.port, 5600);
        assert!(prefs.suggest_host);
    }
}
