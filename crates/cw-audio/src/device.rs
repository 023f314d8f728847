//! Audio device enumeration and host selection.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};

use crate::{AudioError, AudioResult};

/// Basic device identity, enough for a demo/CLI to list choices by name.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
}

/// Selects the platform's preferred low-latency host, falling back to the
/// default host where that preference is unavailable.
pub fn get_host() -> Host {
    #[cfg(target_os = "windows")]
    {
        if let Some(id) = cpal::available_hosts().into_iter().find(|h| *h == cpal::HostId::Asio) {
            if let Ok(host) = cpal::host_from_id(id) {
                return host;
            }
        }
    }

    #[cfg(all(target_os = "linux", feature = "jack"))]
    {
        if let Some(id) = cpal::available_hosts().into_iter().find(|h| *h == cpal::HostId::Jack) {
            if let Ok(host) = cpal::host_from_id(id) {
                return host;
            }
        }
    }

    cpal::default_host()
}

pub fn get_default_output_device() -> AudioResult<Device> {
    get_host().default_output_device().ok_or(AudioError::NoDevice)
}

pub fn get_default_input_device() -> AudioResult<Device> {
    get_host().default_input_device().ok_or(AudioError::NoDevice)
}

pub fn get_output_device_by_name(name: &str) -> AudioResult<Device> {
    let host = get_host();
    for device in host.output_devices().map_err(|e| AudioError::BackendError(e.to_string()))? {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(name.to_string()))
}

pub fn get_input_device_by_name(name: &str) -> AudioResult<Device> {
    let host = get_host();
    for device in host.input_devices().map_err(|e| AudioError::BackendError(e.to_string()))? {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(name.to_string()))
}

pub fn list_output_devices() -> AudioResult<Vec<DeviceInfo>> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let mut devices = Vec::new();
    for device in host.output_devices().map_err(|e| AudioError::BackendError(e.to_string()))? {
        if let Ok(name) = device.name() {
            let is_default = default_name.as_deref() == Some(name.as_str());
            devices.push(DeviceInfo { name, is_default });
        }
    }
    Ok(devices)
}

pub fn list_input_devices() -> AudioResult<Vec<DeviceInfo>> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let mut devices = Vec::new();
    for device in host.input_devices().map_err(|e| AudioError::BackendError(e.to_string()))? {
        if let Ok(name) = device.name() {
            let is_default = default_name.as_deref() == Some(name.as_str());
            devices.push(DeviceInfo { name, is_default });
        }
    }
    Ok(devices)
}
