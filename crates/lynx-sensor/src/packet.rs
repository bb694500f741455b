//! Sensor packet framing
//!
//! Every exchange with the module is a sequence of packets:
//!
//! ```text
//! +--------+---------+------+--------+-----------+----------+
//! | EF 01  | address | kind | length | payload   | checksum |
//! | 2 B    | 4 B BE  | 1 B  | 2 B BE | length-2 B| 2 B BE   |
//! +--------+---------+------+--------+-----------+----------+
//! ```
//!
//! `length` counts the payload plus the checksum. The checksum is the
//! wrapping 16-bit sum of `kind`, both length bytes and every payload byte.
//!
//! Decoding checks framing only: start code, kind, length and checksum. The
//! address is carried through as-is; [`crate::device::Sensor`] rejects replies
//! from an address other than the one it was opened with.

use std::io::Read;

use crate::error::{Result, SensorError};

/// Packet start code
pub const START_CODE: [u8; 2] = [0xEF, 0x01];

/// Factory default module address
pub const DEFAULT_ADDRESS: u32 = 0xFFFF_FFFF;

/// Start code + address + kind + length
pub const HEADER_SIZE: usize = 9;

/// Size of the trailing checksum
pub const CHECKSUM_SIZE: usize = 2;

/// Largest payload accepted from the wire
pub const MAX_PAYLOAD: usize = 256;

/// Packet identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Command = 0x01,
    Data = 0x02,
    Ack = 0x07,
    EndData = 0x08,
}

impl PacketKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(PacketKind::Command),
            0x02 => Some(PacketKind::Data),
            0x07 => Some(PacketKind::Ack),
            0x08 => Some(PacketKind::EndData),
            _ => None,
        }
    }
}

/// A decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub address: u32,
    pub kind: PacketKind,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(address: u32, kind: PacketKind, payload: Vec<u8>) -> Self {
        Self {
            address,
            kind,
            payload,
        }
    }

    /// Serialize to wire format
    pub fn to_bytes(&self) -> Vec<u8> {
        let length = (self.payload.len() + CHECKSUM_SIZE) as u16;
        let length_bytes = length.to_be_bytes();

        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len() + CHECKSUM_SIZE);
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(&self.address.to_be_bytes());
        out.push(self.kind as u8);
        out.extend_from_slice(&length_bytes);
        out.extend_from_slice(&self.payload);
        let sum = checksum(self.kind as u8, length_bytes, &self.payload);
        out.extend_from_slice(&sum.to_be_bytes());
        out
    }

    /// Decode one packet from the front of `bytes`
    ///
    /// Returns the packet and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < HEADER_SIZE {
            return Err(SensorError::Protocol(format!(
                "packet too short: {} bytes",
                bytes.len()
            )));
        }

        if bytes[0..2] != START_CODE {
            return Err(SensorError::Protocol(format!(
                "bad start code {:02X}{:02X}",
                bytes[0], bytes[1]
            )));
        }

        let address = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let kind = PacketKind::from_byte(bytes[6]).ok_or_else(|| {
            SensorError::Protocol(format!("unknown packet kind 0x{:02X}", bytes[6]))
        })?;
        let length_bytes = [bytes[7], bytes[8]];
        let length = u16::from_be_bytes(length_bytes) as usize;

        if length < CHECKSUM_SIZE {
            return Err(SensorError::Protocol(format!("invalid length {}", length)));
        }
        let payload_len = length - CHECKSUM_SIZE;
        if payload_len > MAX_PAYLOAD {
            return Err(SensorError::Protocol(format!(
                "payload of {} bytes exceeds limit",
                payload_len
            )));
        }

        let total = HEADER_SIZE + length;
        if bytes.len() < total {
            return Err(SensorError::Protocol(format!(
                "truncated packet: need {} bytes, have {}",
                total,
                bytes.len()
            )));
        }

        let payload = bytes[HEADER_SIZE..HEADER_SIZE + payload_len].to_vec();
        let received = u16::from_be_bytes([bytes[total - 2], bytes[total - 1]]);
        let expected = checksum(kind as u8, length_bytes, &payload);
        if received != expected {
            return Err(SensorError::Protocol(format!(
                "checksum mismatch: got 0x{:04X}, expected 0x{:04X}",
                received, expected
            )));
        }

        Ok((
            Self {
                address,
                kind,
                payload,
            },
            total,
        ))
    }
}

/// Read exactly one packet from a blocking reader
pub fn read_packet<R: Read + ?Sized>(reader: &mut R) -> Result<Packet> {
    let mut buf = vec![0u8; HEADER_SIZE];
    reader.read_exact(&mut buf)?;

    let length = u16::from_be_bytes([buf[7], buf[8]]) as usize;
    if length < CHECKSUM_SIZE || length - CHECKSUM_SIZE > MAX_PAYLOAD {
        return Err(SensorError::Protocol(format!("invalid length {}", length)));
    }

    buf.resize(HEADER_SIZE + length, 0);
    reader.read_exact(&mut buf[HEADER_SIZE..])?;

    let (packet, _) = Packet::decode(&buf)?;
    Ok(packet)
}

fn checksum(kind: u8, length: [u8; 2], payload: &[u8]) -> u16 {
    payload.iter().fold(
        (kind as u16)
            .wrapping_add(length[0] as u16)
            .wrapping_add(length[1] as u16),
        |acc, b| acc.wrapping_add(*b as u16),
    )
}
