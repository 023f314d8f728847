//! cw-audio: the audio engine's real-time callback entry point plus a thin
//! reference device backend (§4.7, §4.7.1).

mod backend;
mod device;
mod engine;
mod error;

pub use backend::{AudioBackend, CallbackInfo, CpalBackend};
pub use device::{
    get_default_input_device, get_default_output_device, get_host, get_input_device_by_name,
    get_output_device_by_name, list_input_devices, list_output_devices, DeviceInfo,
};
pub use engine::{AudioEngine, Capability};
pub use error::{AudioError, AudioResult};
