//! Core data types: image buffers, delivery statuses, device metadata and
//! acquisition options.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default number of buffers primed into the stream channel.
pub const DEFAULT_BUFFER_COUNT: usize = 30;

/// Default interval between poll passes of the acquisition loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// Buffer identity and status
// =============================================================================

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a buffer, stable across recycling.
///
/// The id follows the buffer through the channel and back, so the channel can
/// keep an ownership tag per buffer without aliasing its memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// Delivery status of a buffer.
///
/// The acquisition loop only branches on "success vs. not": any non-success
/// payload is discarded and the buffer is recycled as scratch space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BufferStatus {
    /// Owned by the channel, not yet filled.
    Pending,
    /// Payload is valid and sized per width x height.
    Success,
    /// The transport failed to deliver an intact payload.
    TransportError,
    /// Delivery was aborted before completion.
    Aborted,
}

impl BufferStatus {
    /// Returns true if the payload may be interpreted.
    pub fn is_success(&self) -> bool {
        matches!(self, BufferStatus::Success)
    }
}

impl fmt::Display for BufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferStatus::Pending => write!(f, "pending"),
            BufferStatus::Success => write!(f, "success"),
            BufferStatus::TransportError => write!(f, "transport error"),
            BufferStatus::Aborted => write!(f, "aborted"),
        }
    }
}

// =============================================================================
// Buffer
// =============================================================================

/// A fixed-capacity image buffer circulating between the stream channel and
/// the caller.
///
/// Ownership is transferred by value: pushing a buffer moves it into the
/// channel, popping moves it back out. While the channel owns it the caller
/// holds no handle to its memory, which is the central invariant of the pool.
/// A recycled buffer is scratch space; its previous content is meaningless.
#[derive(Debug)]
pub struct Buffer {
    id: BufferId,
    data: Vec<u8>,
    status: BufferStatus,
    width: u32,
    height: u32,
}

impl Buffer {
    /// Allocate a fresh buffer of the given capacity, typically the device's
    /// reported payload size.
    pub fn new(capacity: usize) -> Self {
        Self {
            id: BufferId::next(),
            data: vec![0; capacity],
            status: BufferStatus::Pending,
            width: 0,
            height: 0,
        }
    }

    /// Reassemble a buffer from parts delivered by the transport.
    pub(crate) fn from_parts(
        id: BufferId,
        data: Vec<u8>,
        status: BufferStatus,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            id,
            data,
            status,
            width,
            height,
        }
    }

    /// The buffer's identity.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Delivery status of the most recent completion.
    pub fn status(&self) -> BufferStatus {
        self.status
    }

    /// Image width in pixels (0 until successfully delivered).
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels (0 until successfully delivered).
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Payload bytes. Only meaningful when `status().is_success()`.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Tear the buffer into id + backing storage for handoff to a transport.
    pub(crate) fn into_parts(self) -> (BufferId, Vec<u8>) {
        (self.id, self.data)
    }
}

// =============================================================================
// Device metadata
// =============================================================================

/// Information about a discovered camera.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceInfo {
    /// Stable identifier, the device's user-defined name when set.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Control endpoint address.
    pub address: SocketAddr,
}

impl DeviceInfo {
    /// Create a new device info.
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address,
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.name, self.address)
    }
}

// =============================================================================
// Acquisition options
// =============================================================================

/// Options controlling an acquisition run.
///
/// Geometry requests are optional: only positive requested values are applied
/// to the device, non-positive requests leave the feature unchanged.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AcquisitionOptions {
    /// Requested image width, if any.
    pub width: Option<i64>,
    /// Requested image height, if any.
    pub height: Option<i64>,
    /// Requested horizontal binning, if any.
    pub binning_horizontal: Option<i64>,
    /// Requested vertical binning, if any.
    pub binning_vertical: Option<i64>,
    /// Hand the first successfully delivered frame to the snapshot handler.
    pub snapshot: bool,
    /// Size the receive socket buffer automatically when the stream opens.
    pub auto_socket_buffer: bool,
    /// Number of buffers primed into the pool before starting.
    pub buffer_count: usize,
    /// Sleep between poll passes of the acquisition loop.
    pub poll_interval: Duration,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            binning_horizontal: None,
            binning_vertical: None,
            snapshot: false,
            auto_socket_buffer: false,
            buffer_count: DEFAULT_BUFFER_COUNT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl AcquisitionOptions {
    /// Create options with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an image width (builder pattern). Non-positive values are
    /// treated as "leave unchanged".
    pub fn with_width(mut self, width: i64) -> Self {
        self.width = (width > 0).then_some(width);
        self
    }

    /// Request an image height (builder pattern). Non-positive values are
    /// treated as "leave unchanged".
    pub fn with_height(mut self, height: i64) -> Self {
        self.height = (height > 0).then_some(height);
        self
    }

    /// Request horizontal binning (builder pattern). Non-positive values are
    /// treated as "leave unchanged".
    pub fn with_binning_horizontal(mut self, binning: i64) -> Self {
        self.binning_horizontal = (binning > 0).then_some(binning);
        self
    }

    /// Request vertical binning (builder pattern). Non-positive values are
    /// treated as "leave unchanged".
    pub fn with_binning_vertical(mut self, binning: i64) -> Self {
        self.binning_vertical = (binning > 0).then_some(binning);
        self
    }

    /// Enable snapshot-on-first-success (builder pattern).
    pub fn with_snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Enable automatic receive socket buffer sizing (builder pattern).
    pub fn with_auto_socket_buffer(mut self, auto: bool) -> Self {
        self.auto_socket_buffer = auto;
        self
    }

    /// Set the number of buffers primed into the pool (builder pattern).
    pub fn with_buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count;
        self
    }

    /// Set the poll interval of the acquisition loop (builder pattern).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
