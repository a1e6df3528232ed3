//! Low-level wire protocol for camera control and stream traffic.
//!
//! A deliberately small, self-consistent subset of a GigE-Vision-style
//! protocol: big-endian control packets over UDP (discovery, register
//! read/write, memory read) and one-datagram-per-frame stream packets.
//! Interoperability with real cameras is out of scope; the mock camera used
//! by the test suite speaks exactly this dialect.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io;

use crate::types::BufferStatus;

/// UDP port the camera listens on for control traffic.
pub const CONTROL_PORT: u16 = 3956;

/// Magic byte opening every control command packet.
pub const PACKET_MAGIC: u8 = 0x42;

/// Flag requesting an acknowledge for a command.
pub const FLAG_ACK_REQUIRED: u8 = 0x01;

// Command identifiers (requests are even, acknowledges odd).
pub const DISCOVERY_CMD: u16 = 0x0002;
pub const DISCOVERY_ACK: u16 = 0x0003;
pub const READREG_CMD: u16 = 0x0080;
pub const READREG_ACK: u16 = 0x0081;
pub const WRITEREG_CMD: u16 = 0x0082;
pub const WRITEREG_ACK: u16 = 0x0083;
pub const READMEM_CMD: u16 = 0x0084;
pub const READMEM_ACK: u16 = 0x0085;

// Acknowledge status codes.
pub const STATUS_SUCCESS: u16 = 0x0000;
pub const STATUS_INVALID_PARAMETER: u16 = 0x8002;
pub const STATUS_INVALID_ADDRESS: u16 = 0x8003;

/// Frame status byte carried in stream packet headers.
pub const FRAME_STATUS_SUCCESS: u8 = 0x00;
pub const FRAME_STATUS_ERROR: u8 = 0x01;
pub const FRAME_STATUS_ABORTED: u8 = 0x02;

/// Well-known register addresses shared by the control port, the default
/// feature schema and the mock camera.
pub mod registers {
    /// Stream channel destination port. The host writes its receive port here
    /// when the stream channel opens; reading it back is the port diagnostic.
    pub const STREAM_CHANNEL_PORT: u32 = 0x0000_0d00;

    /// User-defined device name block (bootstrap memory).
    pub const USER_DEFINED_NAME: u32 = 0x0000_0218;
    /// Size of the user-defined name block in bytes.
    pub const USER_DEFINED_NAME_SIZE: usize = 16;

    // Default feature register layout. A real device would describe this in
    // its GenICam schema; the built-in map stands in for it.
    pub const WIDTH: u32 = 0x0001_0000;
    pub const HEIGHT: u32 = 0x0001_0004;
    pub const BINNING_HORIZONTAL: u32 = 0x0001_0008;
    pub const BINNING_VERTICAL: u32 = 0x0001_000c;
    pub const PAYLOAD_SIZE: u32 = 0x0001_0010;
    pub const SENSOR_WIDTH: u32 = 0x0001_0014;
    pub const SENSOR_HEIGHT: u32 = 0x0001_0018;
    pub const ACQUISITION_START: u32 = 0x0001_0020;
    pub const ACQUISITION_STOP: u32 = 0x0001_0024;
}

/// Protocol types that may be written to big-endian bytes.
pub trait WriteToBytes {
    fn write_to_bytes<W: WriteBytesExt>(&self, writer: W) -> io::Result<()>;
}

/// Protocol types that may be read from big-endian bytes.
pub trait ReadFromBytes: Sized {
    fn read_from_bytes<R: ReadBytesExt>(reader: R) -> io::Result<Self>;
}

/// Types that have a constant size when written to or read from bytes.
pub trait SizeBytes {
    const SIZE_BYTES: usize;
}

// =============================================================================
// Control packets
// =============================================================================

/// Header of a control command packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    /// Command identifier (`*_CMD` constant).
    pub command: u16,
    /// Payload length in bytes.
    pub length: u16,
    /// Request id echoed by the acknowledge.
    pub request_id: u16,
}

impl WriteToBytes for CommandHeader {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u8(PACKET_MAGIC)?;
        writer.write_u8(FLAG_ACK_REQUIRED)?;
        writer.write_u16::<BigEndian>(self.command)?;
        writer.write_u16::<BigEndian>(self.length)?;
        writer.write_u16::<BigEndian>(self.request_id)?;
        Ok(())
    }
}

impl ReadFromBytes for CommandHeader {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let magic = reader.read_u8()?;
        if magic != PACKET_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad control packet magic 0x{:02x}", magic),
            ));
        }
        let _flags = reader.read_u8()?;
        let command = reader.read_u16::<BigEndian>()?;
        let length = reader.read_u16::<BigEndian>()?;
        let request_id = reader.read_u16::<BigEndian>()?;
        Ok(CommandHeader {
            command,
            length,
            request_id,
        })
    }
}

impl SizeBytes for CommandHeader {
    const SIZE_BYTES: usize = 8;
}

/// Header of a control acknowledge packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckHeader {
    /// Status code (`STATUS_*` constant).
    pub status: u16,
    /// Acknowledge identifier (`*_ACK` constant).
    pub answer: u16,
    /// Payload length in bytes.
    pub length: u16,
    /// Request id this acknowledges.
    pub request_id: u16,
}

impl AckHeader {
    /// Returns true if the device reported success.
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

impl WriteToBytes for AckHeader {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u16::<BigEndian>(self.status)?;
        writer.write_u16::<BigEndian>(self.answer)?;
        writer.write_u16::<BigEndian>(self.length)?;
        writer.write_u16::<BigEndian>(self.request_id)?;
        Ok(())
    }
}

impl ReadFromBytes for AckHeader {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let status = reader.read_u16::<BigEndian>()?;
        let answer = reader.read_u16::<BigEndian>()?;
        let length = reader.read_u16::<BigEndian>()?;
        let request_id = reader.read_u16::<BigEndian>()?;
        Ok(AckHeader {
            status,
            answer,
            length,
            request_id,
        })
    }
}

impl SizeBytes for AckHeader {
    const SIZE_BYTES: usize = 8;
}

/// Encode a full command packet: header plus payload.
pub fn encode_command(command: u16, request_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(CommandHeader::SIZE_BYTES + payload.len());
    let header = CommandHeader {
        command,
        length: payload.len() as u16,
        request_id,
    };
    // Writing to a Vec cannot fail.
    header
        .write_to_bytes(&mut packet)
        .expect("vec write is infallible");
    packet.extend_from_slice(payload);
    packet
}

/// Encode a full acknowledge packet: header plus payload.
pub fn encode_ack(status: u16, answer: u16, request_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(AckHeader::SIZE_BYTES + payload.len());
    let header = AckHeader {
        status,
        answer,
        length: payload.len() as u16,
        request_id,
    };
    header
        .write_to_bytes(&mut packet)
        .expect("vec write is infallible");
    packet.extend_from_slice(payload);
    packet
}

/// Decode an acknowledge packet into its header and payload slice.
pub fn decode_ack(packet: &[u8]) -> io::Result<(AckHeader, &[u8])> {
    if packet.len() < AckHeader::SIZE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "acknowledge packet shorter than header",
        ));
    }
    let header = AckHeader::read_from_bytes(&packet[..AckHeader::SIZE_BYTES])?;
    let payload = &packet[AckHeader::SIZE_BYTES..];
    if payload.len() < header.length as usize {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "acknowledge payload truncated",
        ));
    }
    Ok((header, &payload[..header.length as usize]))
}

/// Payload of a register read command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRegister {
    pub address: u32,
}

impl WriteToBytes for ReadRegister {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<BigEndian>(self.address)
    }
}

impl ReadFromBytes for ReadRegister {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        Ok(ReadRegister {
            address: reader.read_u32::<BigEndian>()?,
        })
    }
}

impl SizeBytes for ReadRegister {
    const SIZE_BYTES: usize = 4;
}

/// Payload of a register write command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRegister {
    pub address: u32,
    pub value: u32,
}

impl WriteToBytes for WriteRegister {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<BigEndian>(self.address)?;
        writer.write_u32::<BigEndian>(self.value)?;
        Ok(())
    }
}

impl ReadFromBytes for WriteRegister {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let address = reader.read_u32::<BigEndian>()?;
        let value = reader.read_u32::<BigEndian>()?;
        Ok(WriteRegister { address, value })
    }
}

impl SizeBytes for WriteRegister {
    const SIZE_BYTES: usize = 8;
}

/// Payload of a memory read command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadMemory {
    pub address: u32,
    pub count: u16,
}

impl WriteToBytes for ReadMemory {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<BigEndian>(self.address)?;
        writer.write_u16::<BigEndian>(self.count)?;
        Ok(())
    }
}

impl ReadFromBytes for ReadMemory {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let address = reader.read_u32::<BigEndian>()?;
        let count = reader.read_u16::<BigEndian>()?;
        Ok(ReadMemory { address, count })
    }
}

impl SizeBytes for ReadMemory {
    const SIZE_BYTES: usize = 6;
}

// =============================================================================
// Stream packets
// =============================================================================

/// Header of a stream datagram. The payload (one complete frame) follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Monotonic frame counter assigned by the device.
    pub block_id: u16,
    /// Delivery status byte (`FRAME_STATUS_*` constant).
    pub status: u8,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
}

impl FrameHeader {
    /// Map the wire status byte onto the closed buffer status set. Unknown
    /// status bytes are treated as transport errors.
    pub fn buffer_status(&self) -> BufferStatus {
        match self.status {
            FRAME_STATUS_SUCCESS => BufferStatus::Success,
            FRAME_STATUS_ABORTED => BufferStatus::Aborted,
            _ => BufferStatus::TransportError,
        }
    }
}

impl WriteToBytes for FrameHeader {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u16::<BigEndian>(self.block_id)?;
        writer.write_u8(self.status)?;
        writer.write_u8(0)?; // reserved
        writer.write_u32::<BigEndian>(self.width)?;
        writer.write_u32::<BigEndian>(self.height)?;
        Ok(())
    }
}

impl ReadFromBytes for FrameHeader {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let block_id = reader.read_u16::<BigEndian>()?;
        let status = reader.read_u8()?;
        let _reserved = reader.read_u8()?;
        let width = reader.read_u32::<BigEndian>()?;
        let height = reader.read_u32::<BigEndian>()?;
        Ok(FrameHeader {
            block_id,
            status,
            width,
            height,
        })
    }
}

impl SizeBytes for FrameHeader {
    const SIZE_BYTES: usize = 12;
}

/// Encode a full stream datagram: frame header plus payload.
pub fn encode_frame(header: &FrameHeader, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(FrameHeader::SIZE_BYTES + payload.len());
    header
        .write_to_bytes(&mut packet)
        .expect("vec write is infallible");
    packet.extend_from_slice(payload);
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_packet_round_trip() {
        let payload = {
            let mut buf = Vec::new();
            ReadRegister {
                address: registers::WIDTH,
            }
            .write_to_bytes(&mut buf)
            .unwrap();
            buf
        };
        let packet = encode_command(READREG_CMD, 7, &payload);
        assert_eq!(packet.len(), CommandHeader::SIZE_BYTES + 4);

        let header = CommandHeader::read_from_bytes(&packet[..]).unwrap();
        assert_eq!(header.command, READREG_CMD);
        assert_eq!(header.length, 4);
        assert_eq!(header.request_id, 7);

        let body =
            ReadRegister::read_from_bytes(&packet[CommandHeader::SIZE_BYTES..]).unwrap();
        assert_eq!(body.address, registers::WIDTH);
    }

    #[test]
    fn test_decode_ack_rejects_truncated_payload() {
        let mut packet = encode_ack(STATUS_SUCCESS, READREG_ACK, 3, &[0, 0, 2, 128]);
        packet.truncate(packet.len() - 2);
        assert!(decode_ack(&packet).is_err());
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let mut packet = encode_command(DISCOVERY_CMD, 1, &[]);
        packet[0] = 0x99;
        assert!(CommandHeader::read_from_bytes(&packet[..]).is_err());
    }

    #[test]
    fn test_frame_header_status_mapping() {
        let mut header = FrameHeader {
            block_id: 1,
            status: FRAME_STATUS_SUCCESS,
            width: 640,
            height: 480,
        };
        assert_eq!(header.buffer_status(), BufferStatus::Success);
        header.status = FRAME_STATUS_ABORTED;
        assert_eq!(header.buffer_status(), BufferStatus::Aborted);
        header.status = 0x7f; // unknown byte
        assert_eq!(header.buffer_status(), BufferStatus::TransportError);
    }

    #[test]
    fn test_frame_round_trip_preserves_geometry() {
        let header = FrameHeader {
            block_id: 42,
            status: FRAME_STATUS_SUCCESS,
            width: 8,
            height: 2,
        };
        let packet = encode_frame(&header, &[0xab; 16]);
        let decoded = FrameHeader::read_from_bytes(&packet[..]).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(&packet[FrameHeader::SIZE_BYTES..], &[0xab; 16]);
    }
}
