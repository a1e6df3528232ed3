//! Device handle combining the control port and the streaming transport.

use std::sync::Arc;

use log::debug;

use crate::error::{Error, Result};
use crate::features::{lock_port, share_port, ControlPort, FeatureRegistry, FeatureSchema, SharedPort};
use crate::protocol::registers;
use crate::stream::{StreamChannel, StreamTransport};
use crate::types::DeviceInfo;

/// An opened camera.
///
/// Holds the shared control port, the feature registry resolved against it,
/// and the streaming transport until [`open_stream`](Device::open_stream)
/// consumes it. Obtained from [`Discovery`](crate::discovery::Discovery) for
/// real hardware, or assembled directly from trait objects in tests.
pub struct Device {
    info: DeviceInfo,
    port: SharedPort,
    registry: FeatureRegistry,
    transport: Option<Box<dyn StreamTransport>>,
}

impl Device {
    /// Assemble a device from its parts.
    pub fn new(
        info: DeviceInfo,
        control: Box<dyn ControlPort>,
        schema: FeatureSchema,
        transport: Box<dyn StreamTransport>,
    ) -> Self {
        let port = share_port(control);
        let registry = FeatureRegistry::new(schema, Arc::clone(&port));
        Self {
            info,
            port,
            registry,
            transport: Some(transport),
        }
    }

    /// Metadata recorded at discovery time.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// The feature registry bound to this device's control port.
    pub fn features(&self) -> &FeatureRegistry {
        &self.registry
    }

    /// Read a raw 32-bit register, bypassing the feature layer.
    pub fn read_register(&self, address: u32) -> Result<u32> {
        let mut port = lock_port(&self.port)?;
        port.read_register(address)
    }

    /// Write a raw 32-bit register, bypassing the feature layer.
    pub fn write_register(&self, address: u32, value: u32) -> Result<()> {
        let mut port = lock_port(&self.port)?;
        port.write_register(address, value)
    }

    /// Read `len` bytes of raw device memory.
    pub fn read_memory(&self, address: u32, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut port = lock_port(&self.port)?;
        port.read_memory(address, &mut buf)?;
        Ok(buf)
    }

    /// Read the device's user-defined name from bootstrap memory.
    pub fn user_defined_name(&self) -> Result<String> {
        let raw = self.read_memory(registers::USER_DEFINED_NAME, registers::USER_DEFINED_NAME_SIZE)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Open the streaming channel.
    ///
    /// Consumes the device's transport, so this succeeds exactly once per
    /// device; a second call is an [`Error::InvalidState`]. As a side effect
    /// the transport's local port is written to the device's stream channel
    /// port register, which directs the device's frame traffic here.
    pub fn open_stream(&mut self) -> Result<StreamChannel> {
        let transport = self
            .transport
            .take()
            .ok_or_else(|| Error::invalid_state("stream channel already opened"))?;
        let port = transport.local_port();
        debug!("directing stream traffic of {} to local port {}", self.info, port);
        self.write_register(registers::STREAM_CHANNEL_PORT, u32::from(port))?;
        Ok(StreamChannel::open(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::tests::MemoryPort;
    use crate::stream::tests::TestTransport;

    fn test_device() -> (
        Device,
        std::sync::Arc<std::sync::Mutex<std::collections::HashMap<u32, u32>>>,
    ) {
        let (port, regs) = MemoryPort::new();
        let (transport, _) = TestTransport::new();
        let info = DeviceInfo::new("cam-0", "Test Camera", "127.0.0.1:3956".parse().unwrap());
        (
            Device::new(
                info,
                Box::new(port),
                FeatureSchema::default_layout(),
                Box::new(transport),
            ),
            regs,
        )
    }

    #[test]
    fn test_open_stream_publishes_local_port() {
        let (mut device, regs) = test_device();
        let channel = device.open_stream().unwrap();
        assert_eq!(
            regs.lock().unwrap().get(&registers::STREAM_CHANNEL_PORT),
            Some(&u32::from(channel.local_port()))
        );
    }

    #[test]
    fn test_open_stream_twice_is_invalid_state() {
        let (mut device, _) = test_device();
        let _channel = device.open_stream().unwrap();
        let err = device.open_stream().unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[test]
    fn test_raw_register_round_trip() {
        let (device, _) = test_device();
        device.write_register(0x1234, 77).unwrap();
        assert_eq!(device.read_register(0x1234).unwrap(), 77);
    }
}
