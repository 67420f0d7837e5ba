//! Captive-portal DNS responder over a non-blocking UDP socket.
//!
//! Answers every A query for a matching name with a single fixed address, so
//! clients on the configuration network land on the device whatever they
//! try to resolve. One datagram is handled per poll.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use log::{debug, info, warn};

use crate::access_point::WILDCARD_DOMAIN;
use crate::error::PlatformError;
use crate::platform::{DnsProvider, DnsResponder};

const HEADER_LEN: usize = 12;
const MAX_PACKET_SIZE: usize = 512;
const TYPE_A: u16 = 1;
const TYPE_ANY: u16 = 255;
const CLASS_IN: u16 = 1;
const ANSWER_TTL_SECS: u32 = 60;
// Compression pointer to the question name right after the header
const NAME_POINTER: [u8; 2] = [0xC0, 0x0C];

const RCODE_NO_ERROR: u8 = 0;
const RCODE_NAME_ERROR: u8 = 3;

/// Build the reply to `query`, or `None` when the packet is not a standard
/// query worth answering.
pub fn build_response(query: &[u8], domain: &str, address: Ipv4Addr) -> Option<Vec<u8>> {
    if query.len() < HEADER_LEN {
        return None;
    }

    let flags = query[2];
    let is_response = flags & 0x80 != 0;
    let opcode = (flags >> 3) & 0x0F;
    let question_count = u16::from_be_bytes([query[4], query[5]]);
    if is_response || opcode != 0 || question_count == 0 {
        return None;
    }

    let (name, name_end) = parse_name(query, HEADER_LEN)?;
    let question_end = name_end + 4;
    if query.len() < question_end {
        return None;
    }
    let qtype = u16::from_be_bytes([query[name_end], query[name_end + 1]]);
    let qclass = u16::from_be_bytes([query[name_end + 2], query[name_end + 3]]);

    let name_matches = domain == WILDCARD_DOMAIN || name.eq_ignore_ascii_case(domain);
    let answer = name_matches && (qtype == TYPE_A || qtype == TYPE_ANY) && qclass == CLASS_IN;
    let rcode = if name_matches {
        RCODE_NO_ERROR
    } else {
        RCODE_NAME_ERROR
    };

    let mut response = Vec::with_capacity(question_end + 16);
    // ID
    response.extend_from_slice(&query[0..2]);
    // QR + AA, keep RD
    response.push(0x84 | (flags & 0x01));
    // RA + rcode
    response.push(0x80 | rcode);
    // One question, zero or one answer, no authority or additional records
    response.extend_from_slice(&1u16.to_be_bytes());
    response.extend_from_slice(&u16::from(answer).to_be_bytes());
    response.extend_from_slice(&[0, 0, 0, 0]);
    response.extend_from_slice(&query[HEADER_LEN..question_end]);

    if answer {
        response.extend_from_slice(&NAME_POINTER);
        response.extend_from_slice(&TYPE_A.to_be_bytes());
        response.extend_from_slice(&CLASS_IN.to_be_bytes());
        response.extend_from_slice(&ANSWER_TTL_SECS.to_be_bytes());
        response.extend_from_slice(&4u16.to_be_bytes());
        response.extend_from_slice(&address.octets());
    }

    Some(response)
}

/// Dotted name starting at `start` and the offset just past it. Queries
/// never use compression, so pointers are rejected.
fn parse_name(packet: &[u8], start: usize) -> Option<(String, usize)> {
    let mut labels = Vec::new();
    let mut index = start;

    loop {
        let len = *packet.get(index)? as usize;
        index += 1;
        if len == 0 {
            break;
        }
        if len & 0xC0 != 0 {
            return None;
        }
        let label = packet.get(index..index + len)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        index += len;
    }

    Some((labels.join("."), index))
}

/// Binds a fresh UDP socket for every access point session.
#[derive(Clone, Copy, Debug, Default)]
pub struct UdpDnsProvider {
    bind_address: Option<Ipv4Addr>,
}

impl UdpDnsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to one interface instead of all of them.
    pub fn bound_to(address: Ipv4Addr) -> Self {
        Self {
            bind_address: Some(address),
        }
    }
}

impl DnsProvider for UdpDnsProvider {
    type Responder = UdpDnsResponder;

    fn start(
        &mut self,
        port: u16,
        domain: &str,
        address: Ipv4Addr,
    ) -> Result<UdpDnsResponder, PlatformError> {
        let bind = SocketAddr::from((self.bind_address.unwrap_or(Ipv4Addr::UNSPECIFIED), port));
        let socket = UdpSocket::bind(bind)
            .map_err(|err| PlatformError::Dns(format!("bind {}: {}", bind, err)))?;
        socket
            .set_nonblocking(true)
            .map_err(|err| PlatformError::Dns(err.to_string()))?;

        info!("dns: answering {} with {} on {}", domain, address, bind);

        Ok(UdpDnsResponder {
            socket,
            domain: domain.to_string(),
            address,
            buffer: [0; MAX_PACKET_SIZE],
        })
    }
}

pub struct UdpDnsResponder {
    socket: UdpSocket,
    domain: String,
    address: Ipv4Addr,
    buffer: [u8; MAX_PACKET_SIZE],
}

impl UdpDnsResponder {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }
}

impl DnsResponder for UdpDnsResponder {
    fn process_next_request(&mut self) {
        let (len, peer) = match self.socket.recv_from(&mut self.buffer) {
            Ok(received) => received,
            Err(err) if err.kind() == ErrorKind::WouldBlock => return,
            Err(err) => {
                debug!("dns: receive failed: {}", err);
                return;
            }
        };

        let Some(response) = build_response(&self.buffer[..len], &self.domain, self.address)
        else {
            debug!("dns: ignoring {} byte packet from {}", len, peer);
            return;
        };

        if let Err(err) = self.socket.send_to(&response, peer) {
            warn!("dns: reply to {} failed: {}", peer, err);
        }
    }

    fn stop(self) {
        info!("dns: stopped");
    }
}
