//! Acquisition control for GigE-Vision-style network cameras.
//!
//! This crate discovers cameras on the local network, exposes their settings
//! as named features, and runs a polling acquisition loop that circulates a
//! fixed pool of image buffers between the application and the camera's
//! stream channel.
//!
//! # Layers
//!
//! - [`Discovery`] finds cameras by UDP broadcast and opens [`Device`]s.
//! - [`Device`] couples a control port (register and memory access) with a
//!   stream transport, and resolves named features through a
//!   [`FeatureRegistry`].
//! - [`StreamChannel`] moves [`Buffer`]s between caller and camera; ownership
//!   transfers with the buffer value.
//! - [`AcquisitionController`] ties it together: configure, start, poll,
//!   recycle, stop, cancellable at any poll boundary through a
//!   [`CancelToken`].
//!
//! # Example
//!
//! ```ignore
//! use gige_cam::{first_available_device, AcquisitionController, AcquisitionOptions, CancelToken};
//!
//! let Some(device) = first_available_device()? else {
//!     println!("No device found");
//!     return Ok(());
//! };
//! let options = AcquisitionOptions::new().with_width(640).with_height(480);
//! let mut controller = AcquisitionController::new(device, options);
//!
//! let cancel = CancelToken::new();
//! // cancel.cancel() from another thread stops the loop.
//! controller.run(&cancel)?;
//! ```

pub mod controller;
pub mod device;
pub mod discovery;
mod error;
pub mod features;
pub mod protocol;
pub mod stream;
pub mod types;
pub mod udp;

// Error types
pub use error::{Error, Result};

// Core types
pub use types::{
    AcquisitionOptions, Buffer, BufferId, BufferStatus, DeviceInfo, DEFAULT_BUFFER_COUNT,
    DEFAULT_POLL_INTERVAL,
};

// Feature access
pub use features::{
    names, share_port, CommandFeature, ControlPort, FeatureRegistry, FeatureSchema,
    IntegerFeature, SharedPort,
};

// Streaming
pub use stream::{Completion, StreamChannel, StreamOption, StreamTransport};

// Device and discovery
pub use device::Device;
pub use discovery::{first_available_device, Discovery};

// Acquisition
pub use controller::{AcquisitionController, CancelToken, ConfigSummary, ControllerState};

// UDP implementations
pub use udp::{UdpControlPort, UdpStreamTransport};
