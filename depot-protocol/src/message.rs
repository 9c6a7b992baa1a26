//! Typed protocol messages.
//!
//! Client packets decode into [`ClientRequest`]; server responses are
//! built from [`ServerInfo`] and the `SERVER_CONTENT` helpers. Both
//! directions are implemented so the same crate serves servers, clients,
//! and tests.

use crate::error::ProtocolError;
use crate::packet::{Packet, PacketType};
use crate::wire::{PayloadReader, PayloadWriter};
use bytes::Bytes;
use std::fmt;

/// Kinds of downloadable content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ContentType {
    BaseGraphics = 1,
    NewGrf = 2,
    Ai = 3,
    AiLibrary = 4,
    Scenario = 5,
    Heightmap = 6,
    BaseSounds = 7,
    BaseMusic = 8,
    Game = 9,
    GameLibrary = 10,
}

impl ContentType {
    /// All content types, in wire order.
    pub const ALL: [ContentType; 10] = [
        ContentType::BaseGraphics,
        ContentType::NewGrf,
        ContentType::Ai,
        ContentType::AiLibrary,
        ContentType::Scenario,
        ContentType::Heightmap,
        ContentType::BaseSounds,
        ContentType::BaseMusic,
        ContentType::Game,
        ContentType::GameLibrary,
    ];

    /// Parses a wire content-type byte. Zero and out-of-range values are
    /// structurally invalid.
    pub fn from_wire(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(ContentType::BaseGraphics),
            2 => Ok(ContentType::NewGrf),
            3 => Ok(ContentType::Ai),
            4 => Ok(ContentType::AiLibrary),
            5 => Ok(ContentType::Scenario),
            6 => Ok(ContentType::Heightmap),
            7 => Ok(ContentType::BaseSounds),
            8 => Ok(ContentType::BaseMusic),
            9 => Ok(ContentType::Game),
            10 => Ok(ContentType::GameLibrary),
            other => Err(ProtocolError::InvalidContentType(other)),
        }
    }

    /// Returns the wire byte.
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Whether external ids of this type travel byte-swapped on the wire.
    ///
    /// Clients transmit these three types with the opposite byte order;
    /// the swap is undone on receive and reapplied on send so nothing
    /// outside this module needs to know.
    pub fn swaps_unique_id(self) -> bool {
        matches!(
            self,
            ContentType::NewGrf | ContentType::Scenario | ContentType::Heightmap
        )
    }
}

/// External content identifier (4 bytes, rendered as hex).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniqueId(pub [u8; 4]);

impl UniqueId {
    /// Interprets a wire u32 according to the content type's byte order.
    pub fn from_wire(content_type: ContentType, raw: u32) -> Self {
        if content_type.swaps_unique_id() {
            Self(raw.to_be_bytes())
        } else {
            Self(raw.to_le_bytes())
        }
    }

    /// Converts back to the wire u32 for the content type's byte order.
    pub fn to_wire(self, content_type: ContentType) -> u32 {
        if content_type.swaps_unique_id() {
            u32::from_be_bytes(self.0)
        } else {
            u32::from_le_bytes(self.0)
        }
    }

    /// Parses an 8-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut id = [0u8; 4];
        hex::decode_to_slice(s, &mut id).ok()?;
        Some(Self(id))
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// An md5 digest identifying one version of a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Md5sum(pub [u8; 16]);

impl Md5sum {
    /// Parses a 32-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut digest = [0u8; 16];
        hex::decode_to_slice(s, &mut digest).ok()?;
        Some(Self(digest))
    }

    /// The leading 4 bytes, as published to content authors.
    pub fn partial(&self) -> [u8; 4] {
        [self.0[0], self.0[1], self.0[2], self.0[3]]
    }
}

impl fmt::Display for Md5sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Client version triple, nibble-packed into the high bits of a u32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClientVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl ClientVersion {
    pub fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn from_wire(raw: u32) -> Self {
        Self {
            major: ((raw >> 28) & 0xf) as u8,
            minor: ((raw >> 24) & 0xf) as u8,
            patch: ((raw >> 20) & 0xf) as u8,
        }
    }

    pub fn to_wire(self) -> u32 {
        ((self.major as u32 & 0xf) << 28)
            | ((self.minor as u32 & 0xf) << 24)
            | ((self.patch as u32 & 0xf) << 20)
    }

    pub fn as_triple(self) -> [u8; 3] {
        [self.major, self.minor, self.patch]
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// External reference: content type plus unique id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtidRef {
    pub content_type: ContentType,
    pub unique_id: UniqueId,
}

/// External reference pinned to an exact version by md5sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtidMd5Ref {
    pub content_type: ContentType,
    pub unique_id: UniqueId,
    pub md5sum: Md5sum,
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    /// Full listing of one content type.
    InfoList {
        content_type: ContentType,
        client_version: ClientVersion,
    },
    /// Metadata for specific content ids.
    InfoId { content_ids: Vec<u32> },
    /// Metadata by external reference.
    InfoExtid { entries: Vec<ExtidRef> },
    /// Metadata by external reference and md5sum.
    InfoExtidMd5 { entries: Vec<ExtidMd5Ref> },
    /// Download of specific content ids.
    Content { content_ids: Vec<u32> },
}

impl ClientRequest {
    /// Decodes a client packet into a typed request.
    ///
    /// Server-to-client packet types are rejected; any payload bytes left
    /// over after the declared fields are a hard error.
    pub fn decode(packet: &Packet) -> Result<Self, ProtocolError> {
        let mut r = PayloadReader::new(&packet.payload);
        let request = match packet.ptype {
            PacketType::ClientInfoList => {
                let content_type = ContentType::from_wire(r.read_u8()?)?;
                let client_version = ClientVersion::from_wire(r.read_u32()?);
                ClientRequest::InfoList {
                    content_type,
                    client_version,
                }
            }
            PacketType::ClientInfoId => {
                let count = r.read_u16()?;
                let mut content_ids = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    content_ids.push(r.read_u32()?);
                }
                ClientRequest::InfoId { content_ids }
            }
            PacketType::ClientInfoExtid => {
                let count = r.read_u8()?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let content_type = ContentType::from_wire(r.read_u8()?)?;
                    let unique_id = UniqueId::from_wire(content_type, r.read_u32()?);
                    entries.push(ExtidRef {
                        content_type,
                        unique_id,
                    });
                }
                ClientRequest::InfoExtid { entries }
            }
            PacketType::ClientInfoExtidMd5 => {
                let count = r.read_u8()?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let content_type = ContentType::from_wire(r.read_u8()?)?;
                    let unique_id = UniqueId::from_wire(content_type, r.read_u32()?);
                    let md5sum = Md5sum(r.read_md5()?);
                    entries.push(ExtidMd5Ref {
                        content_type,
                        unique_id,
                        md5sum,
                    });
                }
                ClientRequest::InfoExtidMd5 { entries }
            }
            PacketType::ClientContent => {
                let count = r.read_u16()?;
                let mut content_ids = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    content_ids.push(r.read_u32()?);
                }
                ClientRequest::Content { content_ids }
            }
            other => return Err(ProtocolError::UnexpectedPacketType(other.to_wire())),
        };
        r.finish()?;
        Ok(request)
    }

    /// Encodes this request into a client packet.
    pub fn encode(&self) -> Result<Packet, ProtocolError> {
        let mut w = PayloadWriter::new();
        let ptype = match self {
            ClientRequest::InfoList {
                content_type,
                client_version,
            } => {
                w.put_u8(content_type.to_wire());
                w.put_u32(client_version.to_wire());
                PacketType::ClientInfoList
            }
            ClientRequest::InfoId { content_ids } => {
                let count = checked_count(content_ids.len(), u16::MAX as usize, "content ids")?;
                w.put_u16(count as u16);
                for id in content_ids {
                    w.put_u32(*id);
                }
                PacketType::ClientInfoId
            }
            ClientRequest::InfoExtid { entries } => {
                let count = checked_count(entries.len(), u8::MAX as usize, "external ids")?;
                w.put_u8(count as u8);
                for entry in entries {
                    w.put_u8(entry.content_type.to_wire());
                    w.put_u32(entry.unique_id.to_wire(entry.content_type));
                }
                PacketType::ClientInfoExtid
            }
            ClientRequest::InfoExtidMd5 { entries } => {
                let count = checked_count(entries.len(), u8::MAX as usize, "external ids")?;
                w.put_u8(count as u8);
                for entry in entries {
                    w.put_u8(entry.content_type.to_wire());
                    w.put_u32(entry.unique_id.to_wire(entry.content_type));
                    w.put_md5(&entry.md5sum.0);
                }
                PacketType::ClientInfoExtidMd5
            }
            ClientRequest::Content { content_ids } => {
                let count = checked_count(content_ids.len(), u16::MAX as usize, "content ids")?;
                w.put_u16(count as u16);
                for id in content_ids {
                    w.put_u32(*id);
                }
                PacketType::ClientContent
            }
        };
        Ok(Packet::new(ptype, w.into_bytes()))
    }
}

fn checked_count(
    count: usize,
    max: usize,
    what: &'static str,
) -> Result<usize, ProtocolError> {
    if count > max {
        Err(ProtocolError::CountOverflow { what, count, max })
    } else {
        Ok(count)
    }
}

/// One `SERVER_INFO` descriptor as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub content_type: ContentType,
    pub content_id: u32,
    pub filesize: u32,
    pub name: String,
    pub version: String,
    pub url: String,
    pub description: String,
    pub unique_id: UniqueId,
    pub md5sum: Md5sum,
    /// Content ids of required items, in dependency order.
    pub dependencies: Vec<u32>,
    pub tags: Vec<String>,
    /// Unix timestamp of the upload.
    pub upload_date: u32,
}

impl ServerInfo {
    /// Encodes the descriptor into a `SERVER_INFO` packet.
    pub fn encode(&self) -> Result<Packet, ProtocolError> {
        let mut w = PayloadWriter::new();
        w.put_u8(self.content_type.to_wire());
        w.put_u32(self.content_id);
        w.put_u32(self.filesize);
        w.put_string(&self.name);
        w.put_string(&self.version);
        w.put_string(&self.url);
        w.put_string(&self.description);
        w.put_u32(self.unique_id.to_wire(self.content_type));
        w.put_md5(&self.md5sum.0);

        let dep_count = checked_count(self.dependencies.len(), u8::MAX as usize, "dependencies")?;
        w.put_u8(dep_count as u8);
        for dep in &self.dependencies {
            w.put_u32(*dep);
        }

        let tag_count = checked_count(self.tags.len(), u8::MAX as usize, "tags")?;
        w.put_u8(tag_count as u8);
        for tag in &self.tags {
            w.put_string(tag);
        }

        w.put_u32(self.upload_date);

        let packet = Packet::new(PacketType::ServerInfo, w.into_bytes());
        // Bound at encode time too, so an oversized descriptor surfaces
        // before it reaches the socket.
        packet.encode()?;
        Ok(packet)
    }

    /// Decodes a `SERVER_INFO` packet.
    ///
    /// Returns `Ok(None)` for the empty end-of-listing sentinel.
    pub fn decode(packet: &Packet) -> Result<Option<Self>, ProtocolError> {
        if packet.ptype != PacketType::ServerInfo {
            return Err(ProtocolError::UnexpectedPacketType(packet.ptype.to_wire()));
        }
        if packet.is_empty() {
            return Ok(None);
        }

        let mut r = PayloadReader::new(&packet.payload);
        let content_type = ContentType::from_wire(r.read_u8()?)?;
        let content_id = r.read_u32()?;
        let filesize = r.read_u32()?;
        let name = r.read_string()?;
        let version = r.read_string()?;
        let url = r.read_string()?;
        let description = r.read_string()?;
        let unique_id = UniqueId::from_wire(content_type, r.read_u32()?);
        let md5sum = Md5sum(r.read_md5()?);

        let dep_count = r.read_u8()?;
        let mut dependencies = Vec::with_capacity(dep_count as usize);
        for _ in 0..dep_count {
            dependencies.push(r.read_u32()?);
        }

        let tag_count = r.read_u8()?;
        let mut tags = Vec::with_capacity(tag_count as usize);
        for _ in 0..tag_count {
            tags.push(r.read_string()?);
        }

        let upload_date = r.read_u32()?;
        r.finish()?;

        Ok(Some(Self {
            content_type,
            content_id,
            filesize,
            name,
            version,
            url,
            description,
            unique_id,
            md5sum,
            dependencies,
            tags,
            upload_date,
        }))
    }
}

/// The empty `SERVER_INFO` packet that terminates every listing.
pub fn info_sentinel() -> Packet {
    Packet::empty(PacketType::ServerInfo)
}

/// Header packet announcing one content transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerContentHeader {
    pub content_type: ContentType,
    pub content_id: u32,
    pub filesize: u32,
    pub filename: String,
}

impl ServerContentHeader {
    /// Encodes the header into a `SERVER_CONTENT` packet.
    pub fn encode(&self) -> Result<Packet, ProtocolError> {
        let mut w = PayloadWriter::new();
        w.put_u8(self.content_type.to_wire());
        w.put_u32(self.content_id);
        w.put_u32(self.filesize);
        w.put_string(&self.filename);
        Ok(Packet::new(PacketType::ServerContent, w.into_bytes()))
    }

    /// Decodes a `SERVER_CONTENT` header packet.
    pub fn decode(packet: &Packet) -> Result<Self, ProtocolError> {
        if packet.ptype != PacketType::ServerContent {
            return Err(ProtocolError::UnexpectedPacketType(packet.ptype.to_wire()));
        }
        let mut r = PayloadReader::new(&packet.payload);
        let content_type = ContentType::from_wire(r.read_u8()?)?;
        let content_id = r.read_u32()?;
        let filesize = r.read_u32()?;
        let filename = r.read_string()?;
        r.finish()?;
        Ok(Self {
            content_type,
            content_id,
            filesize,
            filename,
        })
    }
}

/// Wraps one chunk of file bytes in a `SERVER_CONTENT` packet.
pub fn content_chunk(data: Bytes) -> Packet {
    Packet::new(PacketType::ServerContent, data)
}

/// The empty `SERVER_CONTENT` packet that completes a transfer.
pub fn content_terminator() -> Packet {
    Packet::empty(PacketType::ServerContent)
}

/// Explicit "nothing to transfer" indication for one requested id.
///
/// Encoded as a transfer header with content-type byte 0 (reserved,
/// never a valid type), the echoed content id, filesize 0 and an empty
/// filename. Followed by [`content_terminator`], the pair reads as a
/// definite zero-byte completion for that id.
pub fn content_unavailable(content_id: u32) -> Packet {
    let mut w = PayloadWriter::new();
    w.put_u8(0);
    w.put_u32(content_id);
    w.put_u32(0);
    w.put_string("");
    Packet::new(PacketType::ServerContent, w.into_bytes())
}
