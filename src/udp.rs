//! UDP-backed implementations of [`ControlPort`] and [`StreamTransport`].

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt};
use log::{trace, warn};
use socket2::SockRef;

use crate::error::{Error, Result};
use crate::features::ControlPort;
use crate::protocol::{
    decode_ack, encode_command, FrameHeader, ReadFromBytes, ReadMemory, ReadRegister, SizeBytes,
    WriteRegister, WriteToBytes, READMEM_ACK, READMEM_CMD, READREG_ACK, READREG_CMD, WRITEREG_ACK,
    WRITEREG_CMD,
};
use crate::stream::{Completion, StreamOption, StreamTransport};
use crate::types::{BufferId, BufferStatus};

/// How long to wait for an acknowledge before resending a command.
const ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Number of send attempts per command before giving up.
const COMMAND_ATTEMPTS: usize = 3;

/// Receive socket buffer floor used by automatic sizing.
const MIN_SOCKET_BUFFER: usize = 1 << 20;

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

// =============================================================================
// Control port
// =============================================================================

/// Control port over a connected UDP socket.
///
/// Every command carries a request id; acknowledges with a stale id are
/// skipped, timeouts trigger a bounded number of resends. Commands are
/// idempotent at this layer (register reads and writes of absolute values),
/// so a resend after a lost acknowledge is harmless.
pub struct UdpControlPort {
    socket: UdpSocket,
    peer: SocketAddr,
    next_request_id: u16,
}

impl UdpControlPort {
    /// Bind an ephemeral local socket and connect it to the device's control
    /// endpoint.
    pub fn connect(peer: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(peer)?;
        socket.set_read_timeout(Some(ACK_TIMEOUT))?;
        Ok(Self {
            socket,
            peer,
            next_request_id: 1,
        })
    }

    fn next_request_id(&mut self) -> u16 {
        let id = self.next_request_id;
        // 0 is reserved for unsolicited packets.
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        id
    }

    /// Send a command and wait for its acknowledge, resending on timeout.
    fn transact(&mut self, command: u16, answer: u16, payload: &[u8]) -> Result<Vec<u8>> {
        let request_id = self.next_request_id();
        let packet = encode_command(command, request_id, payload);
        let mut scratch = [0u8; 2048];

        for attempt in 0..COMMAND_ATTEMPTS {
            if attempt > 0 {
                trace!(
                    "resending command 0x{:04x} to {} (attempt {})",
                    command,
                    self.peer,
                    attempt + 1
                );
            }
            self.socket.send(&packet)?;
            loop {
                let n = match self.socket.recv(&mut scratch) {
                    Ok(n) => n,
                    Err(err) if is_timeout(&err) => break,
                    Err(err) => return Err(err.into()),
                };
                let (header, body) = match decode_ack(&scratch[..n]) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        warn!("dropping malformed acknowledge from {}: {}", self.peer, err);
                        continue;
                    }
                };
                if header.request_id != request_id {
                    trace!("skipping stale acknowledge for request {}", header.request_id);
                    continue;
                }
                if !header.is_success() {
                    return Err(Error::unreachable(format!(
                        "device {} rejected command 0x{:04x} with status 0x{:04x}",
                        self.peer, command, header.status
                    )));
                }
                if header.answer != answer {
                    return Err(Error::unreachable(format!(
                        "unexpected acknowledge 0x{:04x} for command 0x{:04x}",
                        header.answer, command
                    )));
                }
                return Ok(body.to_vec());
            }
        }
        Err(Error::unreachable(format!(
            "no acknowledge from {} after {} attempts",
            self.peer, COMMAND_ATTEMPTS
        )))
    }
}

impl ControlPort for UdpControlPort {
    fn read_register(&mut self, address: u32) -> Result<u32> {
        let mut payload = Vec::with_capacity(ReadRegister::SIZE_BYTES);
        ReadRegister { address }
            .write_to_bytes(&mut payload)
            .map_err(Error::from)?;
        let body = self.transact(READREG_CMD, READREG_ACK, &payload)?;
        let value = (&body[..]).read_u32::<BigEndian>().map_err(Error::from)?;
        Ok(value)
    }

    fn write_register(&mut self, address: u32, value: u32) -> Result<()> {
        let mut payload = Vec::with_capacity(WriteRegister::SIZE_BYTES);
        WriteRegister { address, value }
            .write_to_bytes(&mut payload)
            .map_err(Error::from)?;
        self.transact(WRITEREG_CMD, WRITEREG_ACK, &payload)?;
        Ok(())
    }

    fn read_memory(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(ReadMemory::SIZE_BYTES);
        ReadMemory {
            address,
            count: buf.len() as u16,
        }
        .write_to_bytes(&mut payload)
        .map_err(Error::from)?;
        let body = self.transact(READMEM_CMD, READMEM_ACK, &payload)?;
        if body.len() != buf.len() {
            return Err(Error::unreachable(format!(
                "short memory read at 0x{:08x}: got {} of {} bytes",
                address,
                body.len(),
                buf.len()
            )));
        }
        buf.copy_from_slice(&body);
        Ok(())
    }
}

// =============================================================================
// Stream transport
// =============================================================================

/// Stream transport over a non-blocking UDP socket.
///
/// Each frame arrives as a single datagram: [`FrameHeader`] followed by the
/// payload. Datagrams are matched to queued buffers in FIFO order, so the
/// device is expected to fill buffers in the order they were announced. A
/// malformed or short datagram consumes the front buffer with a transport
/// error status rather than failing the poll.
pub struct UdpStreamTransport {
    socket: UdpSocket,
    local_port: u16,
    queued: VecDeque<(BufferId, Vec<u8>)>,
}

impl UdpStreamTransport {
    /// Bind a non-blocking receive socket on an ephemeral port.
    pub fn bind() -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_nonblocking(true)?;
        let local_port = socket.local_addr()?.port();
        Ok(Self {
            socket,
            local_port,
            queued: VecDeque::new(),
        })
    }
}

impl StreamTransport for UdpStreamTransport {
    fn local_port(&self) -> u16 {
        self.local_port
    }

    fn set_option(&mut self, option: StreamOption) -> Result<()> {
        let size = match option {
            StreamOption::SocketBufferSize(size) => size,
            StreamOption::SocketBufferAuto => {
                let queued: usize = self
                    .queued
                    .iter()
                    .map(|(_, data)| data.len() + FrameHeader::SIZE_BYTES)
                    .sum();
                queued.max(MIN_SOCKET_BUFFER)
            }
        };
        SockRef::from(&self.socket).set_recv_buffer_size(size)?;
        trace!("stream socket receive buffer set to {} bytes", size);
        Ok(())
    }

    fn queue(&mut self, id: BufferId, data: Vec<u8>) -> Result<()> {
        self.queued.push_back((id, data));
        Ok(())
    }

    fn try_complete(&mut self) -> Result<Option<Completion>> {
        if self.queued.is_empty() {
            return Ok(None);
        }
        let capacity = self.queued.front().map(|(_, data)| data.len()).unwrap_or(0);
        let mut scratch = vec![0u8; FrameHeader::SIZE_BYTES + capacity];

        let n = match self.socket.recv(&mut scratch) {
            Ok(n) => n,
            Err(err) if is_timeout(&err) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let (id, mut data) = self
            .queued
            .pop_front()
            .ok_or_else(|| Error::invalid_state("no queued buffer for received frame"))?;

        if n < FrameHeader::SIZE_BYTES {
            warn!("dropping runt stream datagram ({} bytes)", n);
            return Ok(Some(Completion {
                id,
                data,
                status: BufferStatus::TransportError,
                width: 0,
                height: 0,
            }));
        }
        let header =
            FrameHeader::read_from_bytes(&scratch[..FrameHeader::SIZE_BYTES]).map_err(Error::from)?;
        let payload = &scratch[FrameHeader::SIZE_BYTES..n];
        let copied = payload.len().min(data.len());
        data[..copied].copy_from_slice(&payload[..copied]);

        Ok(Some(Completion {
            id,
            data,
            status: header.buffer_status(),
            width: header.width,
            height: header.height,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_ack, encode_frame, CommandHeader, FRAME_STATUS_SUCCESS, STATUS_SUCCESS};
    use crate::types::Buffer;
    use std::net::SocketAddrV4;
    use std::thread;

    /// One-shot register responder on a loopback socket.
    fn spawn_readreg_responder(value: u32) -> SocketAddr {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = socket.local_addr().unwrap();
        thread::spawn(move || {
            let mut buf = [0u8; 2048];
            let (n, src) = socket.recv_from(&mut buf).unwrap();
            let header = CommandHeader::read_from_bytes(&buf[..n]).unwrap();
            assert_eq!(header.command, READREG_CMD);
            let ack = encode_ack(
                STATUS_SUCCESS,
                READREG_ACK,
                header.request_id,
                &value.to_be_bytes(),
            );
            socket.send_to(&ack, src).unwrap();
        });
        addr
    }

    #[test]
    fn test_control_port_register_read_over_loopback() {
        let peer = spawn_readreg_responder(0x0000_0280);
        let mut port = UdpControlPort::connect(peer).unwrap();
        assert_eq!(port.read_register(0x0001_0000).unwrap(), 0x0280);
    }

    #[test]
    fn test_control_port_times_out_when_unanswered() {
        // Nothing listens on this socket's peer after it is dropped.
        let peer = {
            let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            socket.local_addr().unwrap()
        };
        let mut port = UdpControlPort::connect(peer).unwrap();
        let err = port.read_register(0x0001_0000).unwrap_err();
        assert!(err.is_unreachable());
    }

    #[test]
    fn test_stream_transport_delivers_frame_datagram() {
        let mut transport = UdpStreamTransport::bind().unwrap();
        let id = Buffer::new(16).id();
        transport.queue(id, vec![0u8; 16]).unwrap();

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let dest = SocketAddrV4::new(Ipv4Addr::LOCALHOST, transport.local_port());
        let frame = encode_frame(
            &FrameHeader {
                block_id: 1,
                status: FRAME_STATUS_SUCCESS,
                width: 4,
                height: 4,
            },
            &[0xc3; 16],
        );
        sender.send_to(&frame, dest).unwrap();

        // Non-blocking receive; allow the datagram to land.
        let completion = (0..50)
            .find_map(|_| {
                thread::sleep(Duration::from_millis(10));
                transport.try_complete().unwrap()
            })
            .expect("frame not delivered");
        assert_eq!(completion.id, id);
        assert_eq!(completion.status, BufferStatus::Success);
        assert_eq!(completion.width, 4);
        assert_eq!(completion.data, vec![0xc3; 16]);
    }

    #[test]
    fn test_stream_transport_marks_runt_datagram_as_error() {
        let mut transport = UdpStreamTransport::bind().unwrap();
        transport.queue(Buffer::new(16).id(), vec![0u8; 16]).unwrap();

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let dest = SocketAddrV4::new(Ipv4Addr::LOCALHOST, transport.local_port());
        sender.send_to(&[0x01, 0x02], dest).unwrap();

        let completion = (0..50)
            .find_map(|_| {
                thread::sleep(Duration::from_millis(10));
                transport.try_complete().unwrap()
            })
            .expect("runt not delivered");
        assert_eq!(completion.status, BufferStatus::TransportError);
    }

    #[test]
    fn test_stream_transport_idle_poll_returns_none() {
        let mut transport = UdpStreamTransport::bind().unwrap();
        assert!(transport.try_complete().unwrap().is_none());
        transport.queue(Buffer::new(8).id(), vec![0u8; 8]).unwrap();
        assert!(transport.try_complete().unwrap().is_none());
    }
}
