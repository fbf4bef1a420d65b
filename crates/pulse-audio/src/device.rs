//! Audio device enumeration and selection

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};

use crate::{AudioError, AudioResult};

/// Get the audio host (platform-specific backend)
pub fn get_host() -> Host {
    #[cfg(target_os = "linux")]
    {
        // Prefer JACK when present, fall back to the default (ALSA/Pulse)
        if let Some(host_id) = cpal::available_hosts()
            .into_iter()
            .find(|h| *h == cpal::HostId::Jack)
        {
            if let Ok(host) = cpal::host_from_id(host_id) {
                return host;
            }
        }
        cpal::default_host()
    }

    #[cfg(not(target_os = "linux"))]
    {
        cpal::default_host()
    }
}

/// Get the default output device
pub fn get_default_output_device() -> AudioResult<Device> {
    get_host().default_output_device().ok_or(AudioError::NoDevice)
}

/// Find an output device by name
pub fn get_output_device_by_name(name: &str) -> AudioResult<Device> {
    let host = get_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::BackendError(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// List available output device names; the default first
pub fn list_output_devices() -> AudioResult<Vec<String>> {
    let host = get_host();
    let default_name = host
        .default_output_device()
        .and_then(|d| d.name().ok());

    let mut names = Vec::new();
    if let Some(name) = &default_name {
        names.push(name.clone());
    }
    for device in host
        .output_devices()
        .map_err(|e| AudioError::BackendError(e.to_string()))?
    {
        if let Ok(name) = device.name() {
            if Some(&name) != default_name.as_ref() {
                names.push(name);
            }
        }
    }
    Ok(names)
}
