//! Stream mode coordination and endpoint-list hygiene.
//!
//! A device streams over UDP, relays over RTMP, or records locally. The
//! endpoint list constrains the mode: RTMP and UDP fan-out are never active
//! together for one device, and the MJPG encoder is not viable for RTMP
//! relay. Hygiene runs after every endpoint mutation and self-corrects any
//! transient mixed state.

use crate::device::{Device, EncodeType, Endpoint, StreamConfig, StreamType};

/// Whether the "add endpoint" affordance is available. Adding a second
/// target while an RTMP endpoint still has no URL configured is blocked.
pub fn can_add_endpoint(stream: &StreamConfig) -> bool {
    !stream
        .endpoints
        .iter()
        .any(|e| matches!(e, Endpoint::Rtmp { rtmp_url } if rtmp_url.is_empty()))
}

/// The streaming mode implied by the endpoint list: RTMP when any relay
/// target is present, plain UDP otherwise.
pub fn streaming_mode(stream: &StreamConfig) -> StreamType {
    if stream.endpoints.iter().any(Endpoint::is_rtmp) {
        StreamType::Rtmp
    } else {
        StreamType::Udp
    }
}

/// Toggle between RECORDING and the streaming mode the endpoint list implies.
pub fn toggle_recording(stream: &mut StreamConfig) {
    stream.stream_type = if stream.stream_type == StreamType::Recording {
        streaming_mode(stream)
    } else {
        StreamType::Recording
    };
}

/// Enforce the endpoint-list invariants on one device. Returns `true` when
/// anything changed (callers then schedule a confirmation write).
///
/// 1. An RTMP target with the MJPG encoder forces a switch to the first
///    other encoder the device supports.
/// 2. A mixed RTMP/UDP list keeps only the RTMP endpoints.
pub fn sanitize(device: &mut Device) -> bool {
    let mut changed = false;

    let has_rtmp = device.stream.endpoints.iter().any(Endpoint::is_rtmp);
    let has_udp = device.stream.endpoints.iter().any(Endpoint::is_udp);

    if has_rtmp && device.stream.encode_type == EncodeType::Mjpg {
        match device
            .supported_encoders()
            .into_iter()
            .find(|enc| *enc != EncodeType::Mjpg)
        {
            Some(replacement) => {
                log::info!(
                    "{}: MJPG cannot feed an RTMP relay, switching to {}",
                    device.bus_info,
                    replacement.wire_name()
                );
                device.stream.encode_type = replacement;
                changed = true;
            }
            None => {
                log::warn!(
                    "{}: RTMP endpoint present but no non-MJPG encoder available",
                    device.bus_info
                );
            }
        }
    }

    if has_rtmp && has_udp {
        device.stream.endpoints.retain(Endpoint::is_rtmp);
        log::info!(
            "{}: dropped UDP endpoints, RTMP and UDP fan-out are exclusive",
            device.bus_info
        );
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{
        CameraCapability, DeviceKind, FormatSize, Interval, StreamConfig,
    };
    use std::collections::HashMap;

    fn udp(port: u16) -> Endpoint {
        Endpoint::Udp { host: "192.168.2.1".to_string(), port }
    }

    fn rtmp(url: &str) -> Endpoint {
        Endpoint::Rtmp { rtmp_url: url.to_string() }
    }

    fn device(encode_type: EncodeType, endpoints: Vec<Endpoint>) -> Device {
        let mut formats = HashMap::new();
        let size = FormatSize {
            width: 1920,
            height: 1080,
            intervals: vec![Interval { numerator: 1, denominator: 30 }],
        };
        formats.insert("MJPG".to_string(), vec![size.clone()]);
        formats.insert("H264".to_string(), vec![size]);

        Device {
            bus_info: "usb-1".to_string(),
            device_type: DeviceKind::Plain,
            name: None,
            manufacturer: None,
            nickname: String::new(),
            controls: vec![],
            stream: StreamConfig {
                encode_type,
                width: 1920,
                height: 1080,
                interval: Interval { numerator: 1, denominator: 30 },
                enabled: false,
                stream_type: StreamType::Udp,
                endpoints,
            },
            cameras: vec![CameraCapability { path: "/dev/video0".to_string(), formats }],
            leader: None,
            follower: None,
            is_managed: false,
            sync_group: None,
        }
    }

    #[test]
    fn mixed_list_converges_to_rtmp_only() {
        let mut dev = device(
            EncodeType::H264,
            vec![udp(5600), rtmp("rtmp://relay.example/a"), udp(5601)],
        );
        assert!(sanitize(&mut dev));
        assert_eq!(dev.stream.endpoints.len(), 1);
        assert!(dev.stream.endpoints.iter().all(Endpoint::is_rtmp));
    }

    #[test]
    fn mjpg_with_rtmp_switches_encoder() {
        let mut dev = device(EncodeType::Mjpg, vec![rtmp("rtmp://relay.example/a")]);
        assert!(sanitize(&mut dev));
        assert_ne!(dev.stream.encode_type, EncodeType::Mjpg);
        // H264 is first in the preference order for this capability set.
        assert_eq!(dev.stream.encode_type, EncodeType::H264);
    }

    #[test]
    fn mjpg_kept_when_no_alternative_encoder() {
        let mut dev = device(EncodeType::Mjpg, vec![rtmp("rtmp://relay.example/a")]);
        dev.cameras[0].formats.remove("H264");
        assert!(!sanitize(&mut dev));
        assert_eq!(dev.stream.encode_type, EncodeType::Mjpg);
    }

    #[test]
    fn clean_udp_list_untouched() {
        let mut dev = device(EncodeType::Mjpg, vec![udp(5600), udp(5601)]);
        assert!(!sanitize(&mut dev));
        assert_eq!(dev.stream.endpoints.len(), 2);
        assert_eq!(dev.stream.encode_type, EncodeType::Mjpg);
    }

    #[test]
    fn add_endpoint_blocked_by_unconfigured_rtmp_target() {
        let stream = device(EncodeType::H264, vec![rtmp("")]).stream;
        assert!(!can_add_endpoint(&stream));

        let stream = device(EncodeType::H264, vec![rtmp("rtmp://relay.example/a")]).stream;
        assert!(can_add_endpoint(&stream));
    }

    #[test]
    fn recording_toggle_restores_implied_mode() {
        let mut stream = device(EncodeType::H264, vec![udp(5600)]).stream;
        toggle_recording(&mut stream);
        assert_eq!(stream.stream_type, StreamType::Recording);
        toggle_recording(&mut stream);
        assert_eq!(stream.stream_type, StreamType::Udp);

        let mut stream = device(EncodeType::H264, vec![rtmp("rtmp://r/a")]).stream;
        stream.stream_type = StreamType::Rtmp;
        toggle_recording(&mut stream);
        toggle_recording(&mut stream);
        assert_eq!(stream.stream_type, StreamType::Rtmp);
    }
}
