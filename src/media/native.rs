//! Native Audio-Geräte über cpal
//!
//! Kamera- und Bildschirmerfassung sind Plattform-Anbindungen außerhalb
//! dieses Crates und werden hier als nicht unterstützt gemeldet.

use super::backend::MediaBackend;
use super::error::MediaError;
use super::types::{
    DeviceKind, DisplayConstraints, MediaConstraints, MediaDeviceInfo, MediaStream, MediaTrack,
    TrackKind, TrackSource,
};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait};

/// Backend für native Audio-Geräte
#[derive(Debug, Default)]
pub struct CpalMediaBackend;

impl CpalMediaBackend {
    pub fn new() -> Self {
        Self
    }

    /// Liest alle Ein- und Ausgabegeräte des Standard-Hosts
    fn list_devices() -> Result<Vec<MediaDeviceInfo>, MediaError> {
        let host = cpal::default_host();
        let group = host.id().name().to_string();

        let mut devices: Vec<MediaDeviceInfo> = host
            .input_devices()
            .map_err(|e| MediaError::Backend(e.to_string()))?
            .filter_map(|d| d.name().ok())
            .map(|name| MediaDeviceInfo {
                device_id: name.clone(),
                kind: DeviceKind::AudioInput,
                label: name,
                group_id: group.clone(),
            })
            .collect();

        devices.extend(
            host.output_devices()
                .map_err(|e| MediaError::Backend(e.to_string()))?
                .filter_map(|d| d.name().ok())
                .map(|name| MediaDeviceInfo {
                    device_id: name.clone(),
                    kind: DeviceKind::AudioOutput,
                    label: name,
                    group_id: group.clone(),
                }),
        );

        Ok(devices)
    }

    /// Findet das gewünschte oder das Standard-Eingabegerät
    fn input_device_name(device_id: Option<&str>) -> Result<String, MediaError> {
        let host = cpal::default_host();

        match device_id {
            Some(id) => host
                .input_devices()
                .map_err(|e| MediaError::Backend(e.to_string()))?
                .filter_map(|d| d.name().ok())
                .find(|name| name == id)
                .ok_or_else(|| MediaError::DeviceNotFound(id.to_string())),
            None => host
                .default_input_device()
                .and_then(|d| d.name().ok())
                .ok_or_else(|| MediaError::DeviceNotFound("no audio input device".to_string())),
        }
    }
}

#[async_trait]
impl MediaBackend for CpalMediaBackend {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, MediaError> {
        if constraints.video.is_some() {
            return Err(MediaError::NotSupported(
                "camera capture is not available on the native backend".to_string(),
            ));
        }

        let Some(audio) = constraints.audio.clone() else {
            return Ok(MediaStream::new(Vec::new()));
        };

        let name = tokio::task::spawn_blocking(move || {
            Self::input_device_name(audio.device_id.as_deref())
        })
        .await
        .map_err(|e| MediaError::Backend(e.to_string()))??;

        tracing::info!("Using audio input device: {}", name);
        Ok(MediaStream::new(vec![MediaTrack::new(
            TrackKind::Audio,
            name.clone(),
            Some(name),
            TrackSource::Device,
        )]))
    }

    async fn get_display_media(
        &self,
        _constraints: &DisplayConstraints,
    ) -> Result<MediaStream, MediaError> {
        Err(MediaError::NotSupported(
            "screen capture is not available on the native backend".to_string(),
        ))
    }

    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, MediaError> {
        tokio::task::spawn_blocking(Self::list_devices)
            .await
            .map_err(|e| MediaError::Backend(e.to_string()))?
    }

    fn name(&self) -> &'static str {
        "cpal"
    }
}
