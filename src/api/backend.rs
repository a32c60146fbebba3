//! Trait seams between the sync engine and the backend.
//!
//! The engine never holds a concrete HTTP client; it reads through
//! [`Backend`] and writes through [`crate::sync::WriteHandler`]. Tests swap
//! in mock implementations.

use std::future::Future;

use crate::device::Device;
use crate::sync::{WriteHandler, WriteKey, WritePayload};

use super::client::{ApiClient, ApiError};
use super::types::{
    DeviceNickname, DeviceSelector, LeaderAssignment, Preferences, RecommendedHost,
    RequestStatus, StreamFormat, StreamInfo, SyncGroupAssignment, UvcControl,
};

/// Read-side operations against the device backend.
pub trait Backend: Send + Sync {
    /// Fetch the full device list snapshot.
    fn fetch_devices(&self) -> impl Future<Output = Result<Vec<Device>, ApiError>> + Send;

    /// Fetch the operator preferences.
    fn fetch_preferences(&self) -> impl Future<Output = Result<Preferences, ApiError>> + Send;

    /// Ask the backend which host newly created UDP endpoints should target.
    fn fetch_recommended_host(&self) -> impl Future<Output = Result<String, ApiError>> + Send;

    /// List the sync group names known to the backend.
    fn list_sync_groups(&self) -> impl Future<Output = Result<Vec<String>, ApiError>> + Send;

    /// Ask the backend to restart the pipeline of one device.
    fn restart_stream(&self, bus_info: &str)
        -> impl Future<Output = Result<(), ApiError>> + Send;
}

impl Backend for ApiClient {
    /// One malformed device entry must not take down the whole snapshot:
    /// entries are decoded individually and bad ones dropped with a warning.
    async fn fetch_devices(&self) -> Result<Vec<Device>, ApiError> {
        let raw: Vec<serde_json::Value> = self.get_json("/devices").await?;
        let mut devices = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_value::<Device>(entry) {
                Ok(device) => devices.push(device),
                Err(e) => log::warn!("dropping malformed device entry: {e}"),
            }
        }
        Ok(devices)
    }

    async fn fetch_preferences(&self) -> Result<Preferences, ApiError> {
        self.get_json("/preferences").await
    }

    async fn fetch_recommended_host(&self) -> Result<String, ApiError> {
        let recommended: RecommendedHost =
            self.get_json("/preferences/get_recommended_host").await?;
        Ok(recommended.host)
    }

    async fn list_sync_groups(&self) -> Result<Vec<String>, ApiError> {
        self.get_json("/devices/sync_groups").await
    }

    async fn restart_stream(&self, bus_info: &str) -> Result<(), ApiError> {
        let body = DeviceSelector { bus_info: bus_info.to_string() };
        let _: RequestStatus = self.post_json("/devices/restart_stream", &body).await?;
        Ok(())
    }
}

impl WriteHandler for ApiClient {
    /// Map one confirmation write onto its backend route.
    async fn dispatch(&self, key: WriteKey, payload: WritePayload) -> Result<(), String> {
        let bus_info = key.bus_info;
        let result: Result<RequestStatus, ApiError> = match payload {
            WritePayload::Nickname(nickname) => {
                self.post_json("/devices/set_nickname", &DeviceNickname { bus_info, nickname })
                    .await
            }
            WritePayload::ControlValue { control_id, value } => {
                self.post_json(
                    "/devices/set_uvc_control",
                    &UvcControl { bus_info, control_id, value },
                )
                .await
            }
            WritePayload::Stream(config) => {
                let info = StreamInfo {
                    bus_info,
                    stream_format: StreamFormat {
                        width: config.width,
                        height: config.height,
                        interval: config.interval,
                    },
                    encode_type: config.encode_type,
                    stream_type: config.stream_type,
                    endpoints: config.endpoints,
                };
                self.post_json("/devices/configure_stream", &info).await
            }
            WritePayload::SetLeader { leader } => {
                self.post_json(
                    "/devices/set_leader",
                    &LeaderAssignment { leader, follower: bus_info },
                )
                .await
            }
            WritePayload::RemoveLeader => {
                self.post_json("/devices/remove_leader", &DeviceSelector { bus_info })
                    .await
            }
            WritePayload::SyncGroup(sync_group) => {
                self.post_json(
                    "/devices/set_sync_group",
                    &SyncGroupAssignment { bus_info, sync_group },
                )
                .await
            }
        };
        result.map(|_| ()).map_err(|e| e.to_string())
    }
}
