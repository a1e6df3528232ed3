//! Streaming channel and buffer pool.
//!
//! A [`StreamChannel`] circulates a fixed set of [`Buffer`]s between the
//! caller and a [`StreamTransport`]. Ownership moves with the `Buffer` value:
//! `push_buffer` transfers it to the channel, `try_pop_buffer` transfers a
//! completed one back. The channel additionally keeps an owner tag per buffer
//! id so a push of a buffer it already owns is rejected instead of silently
//! aliasing pool memory.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{Buffer, BufferId, BufferStatus};

/// Transport-level tuning options. They take effect on subsequent I/O, not
/// retroactively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOption {
    /// Size the receive socket buffer automatically from the queued capacity.
    SocketBufferAuto,
    /// Set an explicit receive socket buffer size in bytes.
    SocketBufferSize(usize),
}

/// A completed transfer delivered by a transport.
#[derive(Debug)]
pub struct Completion {
    pub id: BufferId,
    pub data: Vec<u8>,
    pub status: BufferStatus,
    pub width: u32,
    pub height: u32,
}

/// Receiving side of the streaming transport.
///
/// The key contract is the non-blocking receive: `try_complete` must return
/// `Ok(None)` when no transfer has finished, never block, and deliver
/// completed transfers in arrival order. A queued buffer is eventually either
/// delivered with a status or stays pending while the device has no data;
/// there is no delivery deadline.
pub trait StreamTransport: Send {
    /// Local UDP port the transport receives on (diagnostic).
    fn local_port(&self) -> u16;

    /// Apply a tuning option.
    fn set_option(&mut self, option: StreamOption) -> Result<()>;

    /// Hand a buffer's backing storage to the transport for filling.
    fn queue(&mut self, id: BufferId, data: Vec<u8>) -> Result<()>;

    /// Non-blocking poll for the next completed transfer, in arrival order.
    fn try_complete(&mut self) -> Result<Option<Completion>>;
}

/// Which side currently owns a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotOwner {
    Channel,
    Caller,
}

/// The streaming channel: accepts buffers into the pool and delivers filled
/// ones back in completion order.
pub struct StreamChannel {
    transport: Box<dyn StreamTransport>,
    slots: HashMap<BufferId, SlotOwner>,
}

impl std::fmt::Debug for StreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChannel")
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl StreamChannel {
    /// Wrap an established transport. Use [`Device::open_stream`] to obtain a
    /// channel for a device.
    ///
    /// [`Device::open_stream`]: crate::device::Device::open_stream
    pub(crate) fn open(transport: Box<dyn StreamTransport>) -> Self {
        Self {
            transport,
            slots: HashMap::new(),
        }
    }

    /// Hand a buffer to the channel, marking it available for device fill.
    ///
    /// Call once per fresh buffer to prime the pool, and again every time a
    /// delivered buffer is recycled. The buffer re-enters the pool as scratch
    /// space with no memory of previous content. Pushing a buffer the channel
    /// already owns is an [`Error::InvalidState`].
    pub fn push_buffer(&mut self, buffer: Buffer) -> Result<()> {
        let id = buffer.id();
        if self.slots.get(&id) == Some(&SlotOwner::Channel) {
            return Err(Error::invalid_state(format!(
                "{} is already owned by the channel",
                id
            )));
        }
        let (id, data) = buffer.into_parts();
        self.transport.queue(id, data)?;
        self.slots.insert(id, SlotOwner::Channel);
        Ok(())
    }

    /// Non-blocking poll for the next completed buffer, in arrival order.
    ///
    /// Returns `Ok(None)` when nothing is ready. On `Ok(Some(buffer))`,
    /// ownership of the buffer transfers to the caller until it is pushed
    /// back.
    pub fn try_pop_buffer(&mut self) -> Result<Option<Buffer>> {
        let Some(completion) = self.transport.try_complete()? else {
            return Ok(None);
        };
        match self.slots.get(&completion.id) {
            Some(SlotOwner::Channel) => {}
            _ => {
                return Err(Error::invalid_state(format!(
                    "transport delivered {} which the channel does not own",
                    completion.id
                )));
            }
        }
        self.slots.insert(completion.id, SlotOwner::Caller);
        Ok(Some(Buffer::from_parts(
            completion.id,
            completion.data,
            completion.status,
            completion.width,
            completion.height,
        )))
    }

    /// Apply a transport tuning option.
    pub fn set_option(&mut self, option: StreamOption) -> Result<()> {
        self.transport.set_option(option)
    }

    /// Local port of the receiving endpoint (diagnostic).
    pub fn local_port(&self) -> u16 {
        self.transport.local_port()
    }

    /// Total number of buffers that have circulated through the pool.
    pub fn pool_size(&self) -> usize {
        self.slots.len()
    }

    /// Number of buffers currently owned by the channel.
    pub fn queued(&self) -> usize {
        self.slots
            .values()
            .filter(|owner| **owner == SlotOwner::Channel)
            .count()
    }
}
