//! Audio input device enumeration.

use serde::{Deserialize, Serialize};

/// Metadata about an audio input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Position in the host's device list.
    pub index: usize,
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Number of input channels.
    pub channels: u16,
    /// Default sample rate reported by the device (Hz).
    pub default_sample_rate: u32,
    /// Whether this is the system default input device.
    pub is_default: bool,
}

/// List input-capable devices on the default host.
///
/// Returns an empty `Vec` when no devices exist or enumeration fails
/// (the failure is logged, not surfaced — enumeration is advisory).
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .filter_map(|(index, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", index + 1));
                let config = device.default_input_config().ok()?;
                Some(DeviceInfo {
                    index,
                    name: name.clone(),
                    channels: config.channels(),
                    default_sample_rate: config.sample_rate().0,
                    is_default: default_name.as_deref() == Some(name.as_str()),
                })
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}
