//! Advisory port allocation for new UDP endpoints.

use crate::device::Device;

/// Next free UDP port across every endpoint of every device: one past the
/// highest port in use, or `fallback` when no UDP endpoints exist anywhere
/// or the highest port is already 65535 (no strictly greater port exists).
///
/// Pure and advisory. The operator may override the proposal, so no reuse
/// tracking is kept; callers recompute after every endpoint mutation. RTMP
/// endpoints carry no port and are ignored.
pub fn next_port(devices: &[Device], fallback: u16) -> u16 {
    devices
        .iter()
        .flat_map(|d| d.stream.endpoints.iter())
        .filter_map(|e| e.udp_port())
        .max()
        .and_then(|p| p.checked_add(1))
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{
        Device, DeviceKind, EncodeType, Endpoint, Interval, StreamConfig, StreamType,
    };

    fn device_with_ports(bus_info: &str, ports: &[u16]) -> Device {
        Device {
            bus_info: bus_info.to_string(),
            device_type: DeviceKind::Plain,
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
                endpoints: ports
                    .iter()
                    .map(|p| Endpoint::Udp { host: "192.168.2.1".to_string(), port: *p })
                    .collect(),
            },
            cameras: vec![],
            leader: None,
            follower: None,
            is_managed: false,
            sync_group: None,
        }
    }

    #[test]
    fn returns_one_past_highest_port() {
        let devices = vec![
            device_with_ports("usb-1", &[5600, 5601]),
            device_with_ports("usb-2", &[5605]),
        ];
        assert_eq!(next_port(&devices, 5600), 5606);
    }

    #[test]
    fn fallback_when_no_udp_endpoints() {
        let devices = vec![device_with_ports("usb-1", &[])];
        assert_eq!(next_port(&devices, 5600), 5600);
        assert_eq!(next_port(&[], 5700), 5700);
    }

    #[test]
    fn fallback_at_port_ceiling() {
        // 65536 is not a port; proposing 65535 again would collide.
        let devices = vec![device_with_ports("usb-1", &[5600, u16::MAX])];
        assert_eq!(next_port(&devices, 5600), 5600);
    }

    #[test]
    fn rtmp_endpoints_are_ignored() {
        let mut device = device_with_ports("usb-1", &[]);
        device.stream.endpoints.push(Endpoint::Rtmp {
            rtmp_url: "rtmp://relay.example/live".to_string(),
        });
        assert_eq!(next_port(&[device], 5600), 5600);
    }

    #[test]
    fn strictly_greater_than_every_existing_port() {
        let devices = vec![device_with_ports("usb-1", &[5600, 5601, 5605])];
        let proposed = next_port(&devices, 5600);
        for device in &devices {
            for endpoint in &device.stream.endpoints {
                assert!(proposed > endpoint.udp_port().unwrap());
            }
        }
    }
}
