//! Camera discovery over UDP broadcast.
//!
//! # Example
//!
//! ```ignore
//! use gige_cam::Discovery;
//!
//! let mut discovery = Discovery::new()?;
//! for info in discovery.scan()? {
//!     println!("Found: {}", info);
//!     let device = discovery.connect(&info)?;
//!     // Use device...
//! }
//! ```

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use log::{debug, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::device::Device;
use crate::error::Result;
use crate::features::FeatureSchema;
use crate::protocol::{decode_ack, encode_command, CONTROL_PORT, DISCOVERY_ACK, DISCOVERY_CMD};
use crate::types::DeviceInfo;
use crate::udp::{UdpControlPort, UdpStreamTransport};

/// Default time to wait for discovery acknowledges.
const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_millis(500);

/// Scans the local network for cameras and opens devices from the results.
pub struct Discovery {
    socket: UdpSocket,
    timeout: Duration,
    next_request_id: u16,
}

impl Discovery {
    /// Create a discovery scanner bound to an ephemeral port with broadcast
    /// enabled.
    pub fn new() -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_broadcast(true)?;
        socket.set_reuse_address(true)?;
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        socket.bind(&SockAddr::from(bind_addr))?;

        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(DEFAULT_SCAN_TIMEOUT))?;
        Ok(Self {
            socket,
            timeout: DEFAULT_SCAN_TIMEOUT,
            next_request_id: 1,
        })
    }

    /// Change how long a scan waits for acknowledges.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.socket.set_read_timeout(Some(timeout))?;
        self.timeout = timeout;
        Ok(())
    }

    /// Broadcast a discovery command and collect every camera that answers
    /// within the timeout.
    pub fn scan(&mut self) -> Result<Vec<DeviceInfo>> {
        let broadcast = SocketAddr::from((Ipv4Addr::BROADCAST, CONTROL_PORT));
        self.scan_target(broadcast)
    }

    /// Scan a specific control endpoint instead of broadcasting. Useful when
    /// broadcast traffic is filtered, and for exercising a camera simulator
    /// on localhost.
    pub fn scan_address(&mut self, addr: SocketAddr) -> Result<Vec<DeviceInfo>> {
        self.scan_target(addr)
    }

    fn scan_target(&mut self, target: SocketAddr) -> Result<Vec<DeviceInfo>> {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);

        let packet = encode_command(DISCOVERY_CMD, request_id, &[]);
        self.socket.send_to(&packet, target)?;

        let mut found: Vec<DeviceInfo> = Vec::new();
        let mut buffer = [0u8; 1500];
        let start = Instant::now();
        while start.elapsed() < self.timeout {
            let (n, src) = match self.socket.recv_from(&mut buffer) {
                Ok(received) => received,
                Err(err)
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    break;
                }
                Err(err) => return Err(err.into()),
            };
            let (header, payload) = match decode_ack(&buffer[..n]) {
                Ok(decoded) => decoded,
                Err(err) => {
                    warn!("dropping malformed discovery acknowledge from {}: {}", src, err);
                    continue;
                }
            };
            if header.answer != DISCOVERY_ACK || header.request_id != request_id {
                continue;
            }
            if found.iter().any(|info| info.address == src) {
                continue;
            }
            let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
            let name = String::from_utf8_lossy(&payload[..end]).into_owned();
            debug!("discovered {:?} at {}", name, src);
            found.push(DeviceInfo::new(name.clone(), name, src));
        }
        debug!("scan complete, found {} cameras", found.len());
        Ok(found)
    }

    /// Open a device from a scan result: connects the control port, binds a
    /// stream transport and installs the default feature layout.
    pub fn connect(&self, info: &DeviceInfo) -> Result<Device> {
        let control = UdpControlPort::connect(info.address)?;
        let transport = UdpStreamTransport::bind()?;
        Ok(Device::new(
            info.clone(),
            Box::new(control),
            FeatureSchema::default_layout(),
            Box::new(transport),
        ))
    }
}

/// Convenience: broadcast once and open the first camera that answered.
///
/// Returns `Ok(None)` when no camera is on the network, which callers should
/// treat as a normal outcome rather than a failure.
pub fn first_available_device() -> Result<Option<Device>> {
    let mut discovery = Discovery::new()?;
    let found = discovery.scan()?;
    match found.into_iter().next() {
        Some(info) => Ok(Some(discovery.connect(&info)?)),
        None => Ok(None),
    }
}
