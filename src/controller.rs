//! High-level acquisition control.
//!
//! [`AcquisitionController`] drives a [`Device`] through one complete
//! acquisition: apply the requested geometry, open the stream channel, prime
//! the buffer pool, start acquisition, poll and recycle buffers until
//! cancelled, then stop acquisition. A [`CancelToken`] makes the loop stop
//! from another thread (typically a Ctrl-C handler).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, info, trace, warn};

use crate::device::Device;
use crate::error::Result;
use crate::features::names;
use crate::protocol::registers;
use crate::stream::{StreamChannel, StreamOption};
use crate::types::{AcquisitionOptions, Buffer};

/// Device memory regions probed for diagnostics before streaming starts.
const PROBE_REGIONS: [(u32, usize); 2] = [(0x0001_4150, 8), (0x0000_00e8, 16)];

// =============================================================================
// Cancellation
// =============================================================================

/// Shared cancellation flag for an acquisition run.
///
/// Clone the token and hand the clone to whatever decides when to stop; the
/// acquisition loop observes the flag between poll passes. Cancellation is
/// coarse: the loop finishes its current pass, so the latency to stop is
/// bounded by the poll interval.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the acquisition loop to stop.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`cancel`](CancelToken::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Controller state and configuration summary
// =============================================================================

/// Lifecycle of an [`AcquisitionController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Created, device untouched.
    Idle,
    /// Geometry applied and summary read.
    Configured,
    /// Acquisition started, the poll loop is running.
    Streaming,
    /// Cancelled, shutting the device down.
    Stopping,
}

/// Readings gathered while configuring the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSummary {
    /// Full sensor size in pixels, when the device exposes it.
    pub sensor_size: Option<(i64, i64)>,
    /// Current image size in pixels, when the device exposes it.
    pub image_size: Option<(i64, i64)>,
    /// Upper bounds on the image size.
    pub image_max: Option<(i64, i64)>,
    /// Current binning factors, when the device exposes them.
    pub binning: Option<(i64, i64)>,
    /// Upper bounds on the binning factors.
    pub binning_max: Option<(i64, i64)>,
    /// Bytes per delivered frame. Sizes the buffers in the pool.
    pub payload_size: i64,
}

impl ConfigSummary {
    /// Log the readings at info level.
    pub fn log(&self) {
        if let Some((width, height)) = self.sensor_size {
            info!("sensor size = {} x {}", width, height);
        }
        match (self.image_size, self.image_max) {
            (Some((width, height)), Some((max_width, max_height))) => {
                info!(
                    "image size = {} x {} (max {} x {})",
                    width, height, max_width, max_height
                );
            }
            (Some((width, height)), None) => info!("image size = {} x {}", width, height),
            _ => {}
        }
        match (self.binning, self.binning_max) {
            (Some((horizontal, vertical)), Some((max_horizontal, max_vertical))) => {
                info!(
                    "binning = {} x {} (max {} x {})",
                    horizontal, vertical, max_horizontal, max_vertical
                );
            }
            (Some((horizontal, vertical)), None) => {
                info!("binning = {} x {}", horizontal, vertical)
            }
            _ => {}
        }
        info!(
            "payload size = {} (0x{:x})",
            self.payload_size, self.payload_size
        );
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Runs one acquisition on a device.
///
/// The controller owns the device for its lifetime; [`run`] consumes the
/// device's single stream channel, so a controller performs at most one run.
///
/// [`run`]: AcquisitionController::run
pub struct AcquisitionController {
    device: Device,
    options: AcquisitionOptions,
    state: ControllerState,
    on_snapshot: Option<Box<dyn FnMut(&Buffer) + Send>>,
}

impl AcquisitionController {
    /// Create a controller over an opened device.
    pub fn new(device: Device, options: AcquisitionOptions) -> Self {
        Self {
            device,
            options,
            state: ControllerState::Idle,
            on_snapshot: None,
        }
    }

    /// Install a handler for the snapshot frame (builder pattern).
    ///
    /// When [`AcquisitionOptions::snapshot`] is set, the handler is called at
    /// most once per run, with the first successfully delivered buffer, while
    /// the caller still owns it.
    pub fn with_snapshot_handler(
        mut self,
        handler: impl FnMut(&Buffer) + Send + 'static,
    ) -> Self {
        self.on_snapshot = Some(Box::new(handler));
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// The device this controller drives.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Apply the requested geometry and read back the configuration summary.
    ///
    /// Only explicitly requested values are written; everything else is left
    /// at the device's current setting. A write outside the feature's bounds
    /// fails here, before anything on the device has changed state.
    pub fn configure(&mut self) -> Result<ConfigSummary> {
        let requests = [
            (names::WIDTH, self.options.width),
            (names::HEIGHT, self.options.height),
            (names::BINNING_HORIZONTAL, self.options.binning_horizontal),
            (names::BINNING_VERTICAL, self.options.binning_vertical),
        ];
        for (name, request) in requests {
            if let Some(value) = request {
                let feature = self.device.features().integer(name)?;
                feature.set_value(value)?;
                debug!("{} set to {}", name, value);
            }
        }

        let payload_size = self.device.features().integer(names::PAYLOAD_SIZE)?.value()?;
        let sensor_size = self.read_pair(names::SENSOR_WIDTH, names::SENSOR_HEIGHT)?;
        let (image_size, image_max) = self.read_pair_with_max(names::WIDTH, names::HEIGHT)?;
        let (binning, binning_max) =
            self.read_pair_with_max(names::BINNING_HORIZONTAL, names::BINNING_VERTICAL)?;

        self.state = ControllerState::Configured;
        Ok(ConfigSummary {
            sensor_size,
            image_size,
            image_max,
            binning,
            binning_max,
            payload_size,
        })
    }

    /// Run one acquisition until the token is cancelled.
    ///
    /// Configures the device, opens the stream, primes
    /// [`AcquisitionOptions::buffer_count`] buffers sized to the payload,
    /// starts acquisition and polls every
    /// [`AcquisitionOptions::poll_interval`]. Once cancelled (or if the start
    /// command fails) the device is always asked to stop acquisition before
    /// this returns.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<()> {
        let summary = self.configure()?;
        summary.log();

        let mut channel = self.device.open_stream()?;
        for _ in 0..self.options.buffer_count {
            channel.push_buffer(Buffer::new(summary.payload_size as usize))?;
        }
        if self.options.auto_socket_buffer {
            channel.set_option(StreamOption::SocketBufferAuto)?;
        }

        self.log_stream_port(&channel);
        self.log_memory_probes();

        // Resolve both commands up front so a stop is always possible once
        // a start has been attempted.
        let start = self.device.features().command(names::ACQUISITION_START)?;
        let stop = self.device.features().command(names::ACQUISITION_STOP)?;

        self.state = ControllerState::Streaming;
        let outcome = start
            .execute()
            .and_then(|()| self.poll_until_cancelled(&mut channel, cancel));

        self.state = ControllerState::Stopping;
        // Read the port diagnostic before stopping; the register is only
        // meaningful while the stream channel is active.
        self.log_stream_port(&channel);
        let stopped = stop.execute();
        self.state = ControllerState::Idle;

        outcome.and(stopped)
    }

    fn poll_until_cancelled(
        &mut self,
        channel: &mut StreamChannel,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut completed: u64 = 0;
        let mut failed: u64 = 0;
        let mut snapshot_taken = false;

        while !cancel.is_cancelled() {
            thread::sleep(self.options.poll_interval);
            loop {
                let buffer = match channel.try_pop_buffer() {
                    Ok(Some(buffer)) => buffer,
                    Ok(None) => break,
                    Err(err) => {
                        // A failed receive costs this pass, not the run.
                        warn!("stream receive failed: {}", err);
                        break;
                    }
                };
                if buffer.status().is_success() {
                    completed += 1;
                    trace!(
                        "{} delivered, {} x {}",
                        buffer.id(),
                        buffer.width(),
                        buffer.height()
                    );
                    if self.options.snapshot && !snapshot_taken {
                        if let Some(handler) = self.on_snapshot.as_mut() {
                            handler(&buffer);
                        }
                        snapshot_taken = true;
                    }
                } else {
                    failed += 1;
                    debug!("discarding {} delivered as {}", buffer.id(), buffer.status());
                }
                channel.push_buffer(buffer)?;
            }
        }

        info!("{} buffers received, {} failed", completed, failed);
        Ok(())
    }

    fn log_stream_port(&self, channel: &StreamChannel) {
        match self.device.read_register(registers::STREAM_CHANNEL_PORT) {
            Ok(port) => info!("stream port = {} ({})", port, channel.local_port()),
            Err(err) => warn!("stream port register read failed: {}", err),
        }
    }

    /// Dump a few fixed memory regions and the user-defined name. Purely
    /// diagnostic; failures are logged and ignored.
    fn log_memory_probes(&self) {
        for (address, len) in PROBE_REGIONS {
            match self.device.read_memory(address, len) {
                Ok(bytes) => debug!("memory[0x{:08x}] = {:02x?}", address, bytes),
                Err(err) => warn!("memory read at 0x{:08x} failed: {}", address, err),
            }
        }
        match self.device.user_defined_name() {
            Ok(name) => info!("user defined name = {:?}", name),
            Err(err) => warn!("user defined name read failed: {}", err),
        }
    }

    fn optional_integer(&self, name: &str) -> Result<Option<crate::features::IntegerFeature>> {
        match self.device.features().integer(name) {
            Ok(feature) => Ok(Some(feature)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn read_pair(&self, first: &str, second: &str) -> Result<Option<(i64, i64)>> {
        match (self.optional_integer(first)?, self.optional_integer(second)?) {
            (Some(a), Some(b)) => Ok(Some((a.value()?, b.value()?))),
            _ => Ok(None),
        }
    }

    /// Like `read_pair`, but also reports the features' upper bounds.
    #[allow(clippy::type_complexity)]
    fn read_pair_with_max(
        &self,
        first: &str,
        second: &str,
    ) -> Result<(Option<(i64, i64)>, Option<(i64, i64)>)> {
        match (self.optional_integer(first)?, self.optional_integer(second)?) {
            (Some(a), Some(b)) => Ok((
                Some((a.value()?, b.value()?)),
                Some((a.maximum(), b.maximum())),
            )),
            _ => Ok((None, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::tests::MemoryPort;
    use crate::features::FeatureSchema;
    use crate::stream::tests::{TestTransport, TestTransportState};
    use crate::types::{BufferStatus, DeviceInfo};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    type Regs = Arc<Mutex<HashMap<u32, u32>>>;

    fn test_device() -> (Device, Regs, Arc<Mutex<TestTransportState>>) {
        let (port, regs) = MemoryPort::new();
        let (transport, transport_state) = TestTransport::new();
        let info = DeviceInfo::new("cam-0", "Test Camera", "127.0.0.1:3956".parse().unwrap());
        (
            Device::new(
                info,
                Box::new(port),
                FeatureSchema::default_layout(),
                Box::new(transport),
            ),
            regs,
            transport_state,
        )
    }

    fn reg(regs: &Regs, address: u32) -> Option<u32> {
        regs.lock().unwrap().get(&address).copied()
    }

    #[test]
    fn test_configure_applies_only_requested_values() {
        let (device, regs, _) = test_device();
        regs.lock().unwrap().insert(registers::PAYLOAD_SIZE, 0x4b000);

        let options = AcquisitionOptions::new().with_width(640).with_height(480);
        let mut controller = AcquisitionController::new(device, options);
        let summary = controller.configure().unwrap();

        assert_eq!(reg(&regs, registers::WIDTH), Some(640));
        assert_eq!(reg(&regs, registers::HEIGHT), Some(480));
        assert_eq!(reg(&regs, registers::BINNING_HORIZONTAL), None);
        assert_eq!(reg(&regs, registers::BINNING_VERTICAL), None);
        assert_eq!(summary.payload_size, 0x4b000);
        assert_eq!(summary.image_size, Some((640, 480)));
        assert_eq!(summary.image_max, Some((16384, 16384)));
        assert_eq!(controller.state(), ControllerState::Configured);
    }

    #[test]
    fn test_out_of_range_request_fails_before_start() {
        let (device, regs, _) = test_device();
        let options = AcquisitionOptions::new().with_width(50_000);
        let mut controller = AcquisitionController::new(device, options);

        let err = controller.run(&CancelToken::new()).unwrap_err();
        assert!(err.is_out_of_range());
        assert_eq!(reg(&regs, registers::WIDTH), None);
        assert_eq!(reg(&regs, registers::ACQUISITION_START), None);
    }

    #[test]
    fn test_cancelled_run_still_starts_primes_and_stops() {
        let (device, regs, transport_state) = test_device();
        regs.lock().unwrap().insert(registers::PAYLOAD_SIZE, 1024);

        let options = AcquisitionOptions::new()
            .with_buffer_count(3)
            .with_auto_socket_buffer(true)
            .with_poll_interval(Duration::from_millis(1));
        let mut controller = AcquisitionController::new(device, options);

        let cancel = CancelToken::new();
        cancel.cancel();
        controller.run(&cancel).unwrap();

        assert_eq!(reg(&regs, registers::ACQUISITION_START), Some(1));
        assert_eq!(reg(&regs, registers::ACQUISITION_STOP), Some(1));
        // The stream port register holds the transport's local port.
        assert_eq!(reg(&regs, registers::STREAM_CHANNEL_PORT), Some(40400));

        let transport_state = transport_state.lock().unwrap();
        assert_eq!(transport_state.queued.len(), 3);
        assert!(transport_state
            .queued
            .iter()
            .all(|(_, data)| data.len() == 1024));
        assert_eq!(
            transport_state.options,
            vec![StreamOption::SocketBufferAuto]
        );
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[test]
    fn test_snapshot_fires_once_and_skips_failed_buffers() {
        let (device, regs, transport_state) = test_device();
        regs.lock().unwrap().insert(registers::PAYLOAD_SIZE, 64);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_handler = Arc::clone(&calls);
        let options = AcquisitionOptions::new()
            .with_snapshot(true)
            .with_buffer_count(2)
            .with_poll_interval(Duration::from_millis(1));
        let mut controller = AcquisitionController::new(device, options).with_snapshot_handler(
            move |buffer| {
                assert!(buffer.status().is_success());
                calls_in_handler.fetch_add(1, Ordering::SeqCst);
            },
        );

        let cancel = CancelToken::new();
        let cancel_from_driver = cancel.clone();
        let driver_state = Arc::clone(&transport_state);
        let driver = thread::spawn(move || {
            let wait_for_queued = |count: usize| loop {
                if driver_state.lock().unwrap().queued.len() == count {
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            };

            // Both buffers primed; deliver one failure, then one success.
            wait_for_queued(2);
            {
                let mut state = driver_state.lock().unwrap();
                state.complete_front(BufferStatus::TransportError, 0, 0);
                state.complete_front(BufferStatus::Success, 8, 8);
            }
            // Both recycled; a second success must not snapshot again.
            wait_for_queued(2);
            driver_state
                .lock()
                .unwrap()
                .complete_front(BufferStatus::Success, 8, 8);
            wait_for_queued(2);
            cancel_from_driver.cancel();
        });

        controller.run(&cancel).unwrap();
        driver.join().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reg(&regs, registers::ACQUISITION_STOP), Some(1));
    }

    #[test]
    fn test_default_pool_primes_thirty_buffers() {
        let (device, regs, transport_state) = test_device();
        {
            let mut regs = regs.lock().unwrap();
            regs.insert(registers::PAYLOAD_SIZE, 640 * 480);
            regs.insert(registers::SENSOR_WIDTH, 1280);
            regs.insert(registers::SENSOR_HEIGHT, 960);
        }

        let options = AcquisitionOptions::new().with_width(640).with_height(480);
        let mut controller = AcquisitionController::new(device, options);

        let summary = controller.configure().unwrap();
        assert_eq!(summary.sensor_size, Some((1280, 960)));
        assert_eq!(summary.image_size, Some((640, 480)));

        let cancel = CancelToken::new();
        cancel.cancel();
        controller.run(&cancel).unwrap();

        let transport_state = transport_state.lock().unwrap();
        assert_eq!(transport_state.queued.len(), 30);
        assert!(transport_state
            .queued
            .iter()
            .all(|(_, data)| data.len() == 640 * 480));
    }

    #[test]
    fn test_stop_command_is_idempotent() {
        let (device, regs, _) = test_device();
        let stop = device.features().command(names::ACQUISITION_STOP).unwrap();
        // Stop with no prior start, then again; both writes succeed.
        stop.execute().unwrap();
        stop.execute().unwrap();
        assert_eq!(reg(&regs, registers::ACQUISITION_STOP), Some(1));
        assert_eq!(reg(&regs, registers::ACQUISITION_START), None);
    }

    #[test]
    fn test_second_run_is_invalid_state() {
        let (device, regs, _) = test_device();
        regs.lock().unwrap().insert(registers::PAYLOAD_SIZE, 16);
        let mut controller = AcquisitionController::new(
            device,
            AcquisitionOptions::new()
                .with_buffer_count(1)
                .with_poll_interval(Duration::from_millis(1)),
        );

        let cancel = CancelToken::new();
        cancel.cancel();
        controller.run(&cancel).unwrap();
        let err = controller.run(&cancel).unwrap_err();
        assert!(err.is_invalid_state());
    }
}
