//! Overlay wire format: the packets exchanged between overlay nodes,
//! rendezvous points and clients on the control channel.
//!
//! Every overlay packet starts with a fixed 34-byte prefix followed by the
//! three variable-length string fields it declares. The prefix is a
//! zerocopy struct with explicit big-endian integers, so the layout is the
//! same on every host and there is no unsafe code in this module.
//!
//! Handlers must test flags with [`Flags::is`] (exact match). Several packets
//! share a payload shape and differ only in their flag.

use std::fmt;
use std::ops::BitOr;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use uuid::Uuid;
use zerocopy::byteorder::{BigEndian, U16, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Flags ─────────────────────────────────────────────────────────────────────

/// Packet meaning bitmask.
///
/// The low byte carries overlay-level meanings, the high byte carries
/// server-control meanings. A well-formed packet carries exactly one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags(u16);

impl Flags {
    pub const NONE: Flags = Flags(0);

    // overlay
    pub const DISCOVER: Flags = Flags(0x0001);
    pub const FOUND: Flags = Flags(0x0002);
    pub const MISS: Flags = Flags(0x0004);
    pub const STREAM: Flags = Flags(0x0008);
    pub const PORT: Flags = Flags(0x0010);
    pub const TEARDOWN: Flags = Flags(0x0020);

    // server control
    pub const WAKE: Flags = Flags(0x0100);
    pub const REQUEST: Flags = Flags(0x0200);
    pub const CONTENT: Flags = Flags(0x0400);
    pub const STOP: Flags = Flags(0x0800);
    pub const OK: Flags = Flags(0x1000);
    pub const PING: Flags = Flags(0x2000);
    pub const PONG: Flags = Flags(0x4000);

    /// Every bit an overlay packet may carry.
    pub const OVERLAY_MASK: u16 = 0x003f;
    /// Every bit a server-control packet may carry.
    pub const CONTROL_MASK: u16 = 0x7f00;

    pub const fn from_bits(bits: u16) -> Self {
        Flags(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Exact match: the packet means `f` and nothing else.
    pub fn is(self, f: Flags) -> bool {
        self.0 == f.0
    }

    /// Subset test: every bit of `f` is set. Not for dispatch.
    pub fn contains(self, f: Flags) -> bool {
        f.0 != 0 && self.0 & f.0 == f.0
    }

    pub fn set(&mut self, f: Flags) {
        self.0 |= f.0;
    }

    pub fn unset(&mut self, f: Flags) {
        self.0 &= !f.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn names(self) -> Vec<&'static str> {
        const NAMES: [(Flags, &str); 13] = [
            (Flags::DISCOVER, "DISCOVER"),
            (Flags::FOUND, "FOUND"),
            (Flags::MISS, "MISS"),
            (Flags::STREAM, "STREAM"),
            (Flags::PORT, "PORT"),
            (Flags::TEARDOWN, "TEARDOWN"),
            (Flags::WAKE, "WAKE"),
            (Flags::REQUEST, "REQUEST"),
            (Flags::CONTENT, "CONTENT"),
            (Flags::STOP, "STOP"),
            (Flags::OK, "OK"),
            (Flags::PING, "PING"),
            (Flags::PONG, "PONG"),
        ];
        NAMES
            .iter()
            .filter(|(f, _)| self.contains(*f))
            .map(|(_, n)| *n)
            .collect()
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.names();
        if names.is_empty() {
            write!(f, "0x{:04x}", self.0)
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

// ── Packet prefix ─────────────────────────────────────────────────────────────

/// Fixed part of every overlay packet.
///
/// Wire size: 34 bytes. The string lengths declare how many bytes of
/// source, content name and port follow, in that order.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct PacketPrefix {
    /// Always [`PACKET_MAGIC`]. Lets a decoder reject control-plane JSON early.
    pub magic: u8,
    /// Wire format version. Currently 0x01.
    pub version: u8,
    pub flags: U16<BigEndian>,
    pub request_id: [u8; 16],
    pub hops: U64<BigEndian>,
    pub source_len: U16<BigEndian>,
    pub content_len: U16<BigEndian>,
    pub port_len: U16<BigEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(PacketPrefix, [u8; 34]);

pub const PREFIX_SIZE: usize = std::mem::size_of::<PacketPrefix>();

// ── Packet ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub flags: Flags,
    /// Minted once by the client that started the discovery. Never changes.
    pub request_id: Uuid,
    /// Address of the node the receiver should talk to next.
    pub source: String,
    /// Node-to-node traversals so far.
    pub hops: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub content_name: String,
    /// A relay address (`host:port`) or bare port, depending on the flag.
    pub port: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Payload,
}

impl Packet {
    fn build(flags: Flags, request_id: Uuid, content_name: &str, source: &str, port: &str) -> Self {
        Self {
            header: Header {
                flags,
                request_id,
                source: source.to_string(),
                hops: 0,
            },
            payload: Payload {
                content_name: content_name.to_string(),
                port: port.to_string(),
            },
        }
    }

    pub fn discovery(request_id: Uuid, content_name: &str) -> Self {
        Self::build(Flags::DISCOVER, request_id, content_name, "", "")
    }

    /// `source` is the node that answers for the content.
    pub fn found(request_id: Uuid, content_name: &str, source: &str) -> Self {
        Self::build(Flags::FOUND, request_id, content_name, source, "")
    }

    pub fn miss(request_id: Uuid, content_name: &str) -> Self {
        Self::build(Flags::MISS, request_id, content_name, "", "")
    }

    /// `address` is where the requester will receive the stream.
    pub fn port(request_id: Uuid, content_name: &str, address: &str) -> Self {
        Self::build(Flags::PORT, request_id, content_name, "", address)
    }

    pub fn stream(request_id: Uuid, content_name: &str) -> Self {
        Self::build(Flags::STREAM, request_id, content_name, "", "")
    }

    /// `address` is the downstream address being released.
    pub fn teardown(request_id: Uuid, content_name: &str, source: &str, address: &str) -> Self {
        Self::build(Flags::TEARDOWN, request_id, content_name, source, address)
    }

    pub fn is(&self, f: Flags) -> bool {
        self.header.flags.is(f)
    }

    pub fn request_id(&self) -> Uuid {
        self.header.request_id
    }

    pub fn content_name(&self) -> &str {
        &self.payload.content_name
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let source = self.header.source.as_bytes();
        let content = self.payload.content_name.as_bytes();
        let port = self.payload.port.as_bytes();

        let prefix = PacketPrefix {
            magic: PACKET_MAGIC,
            version: PACKET_VERSION,
            flags: U16::new(self.header.flags.bits()),
            request_id: *self.header.request_id.as_bytes(),
            hops: U64::new(self.header.hops),
            source_len: U16::new(field_len("source", source)?),
            content_len: U16::new(field_len("content_name", content)?),
            port_len: U16::new(field_len("port", port)?),
        };

        let mut buf = BytesMut::with_capacity(PREFIX_SIZE + source.len() + content.len() + port.len());
        buf.put_slice(prefix.as_bytes());
        buf.put_slice(source);
        buf.put_slice(content);
        buf.put_slice(port);
        Ok(buf.to_vec())
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let prefix = PacketPrefix::read_from_prefix(data).ok_or(WireError::Truncated {
            needed: PREFIX_SIZE,
            available: data.len(),
        })?;

        if prefix.magic != PACKET_MAGIC {
            return Err(WireError::BadMagic(prefix.magic));
        }
        if prefix.version != PACKET_VERSION {
            return Err(WireError::UnknownVersion(prefix.version));
        }

        let flags = Flags::from_bits(prefix.flags.get());
        if flags.is_empty() || flags.bits() & !Flags::OVERLAY_MASK != 0 {
            return Err(WireError::UnknownFlags(flags.bits()));
        }

        let lens = [
            prefix.source_len.get() as usize,
            prefix.content_len.get() as usize,
            prefix.port_len.get() as usize,
        ];
        let needed = PREFIX_SIZE + lens.iter().sum::<usize>();
        if data.len() < needed {
            return Err(WireError::Truncated {
                needed,
                available: data.len(),
            });
        }
        if data.len() > needed {
            return Err(WireError::TrailingBytes(data.len() - needed));
        }

        let mut rest = &data[PREFIX_SIZE..];
        let source = take_str(&mut rest, lens[0], "source")?;
        let content_name = take_str(&mut rest, lens[1], "content_name")?;
        let port = take_str(&mut rest, lens[2], "port")?;

        Ok(Packet {
            header: Header {
                flags,
                request_id: Uuid::from_bytes(prefix.request_id),
                source,
                hops: prefix.hops.get(),
            },
            payload: Payload { content_name, port },
        })
    }
}

fn field_len(field: &'static str, bytes: &[u8]) -> Result<u16, WireError> {
    u16::try_from(bytes.len()).map_err(|_| WireError::FieldTooLong {
        field,
        len: bytes.len(),
    })
}

fn take_str(rest: &mut &[u8], len: usize, field: &'static str) -> Result<String, WireError> {
    let (head, tail) = rest.split_at(len);
    *rest = tail;
    String::from_utf8(head.to_vec()).map_err(|_| WireError::InvalidUtf8(field))
}

// ── Constants ─────────────────────────────────────────────────────────────────

pub const PACKET_MAGIC: u8 = 0x6d;

/// Current overlay packet format version.
pub const PACKET_VERSION: u8 = 0x01;

/// Size of one MPEG transport stream packet.
pub const TS_PACKET_SIZE: usize = 188;

/// Transport stream packets carried per datagram on the data plane.
pub const RELAY_BATCH: usize = 10;

/// Relay forwarding buffer. Datagrams larger than this are truncated.
pub const RELAY_BUFFER_SIZE: usize = TS_PACKET_SIZE * RELAY_BATCH;

/// Largest control-channel frame accepted by either side.
pub const MAX_FRAME: usize = 64 * 1024;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("truncated packet: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("bad packet magic: 0x{0:02x}")]
    BadMagic(u8),

    #[error("unknown packet version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("unknown or empty flags: 0x{0:04x}")]
    UnknownFlags(u16),

    #[error("{field} is {len} bytes, longer than the wire allows")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),

    #[error("{0} is not valid utf-8")]
    InvalidUtf8(&'static str),

    #[error("expected {expected} packet, got {actual}")]
    MisTagged { expected: Flags, actual: Flags },

    #[error("malformed control packet: {0}")]
    Json(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
