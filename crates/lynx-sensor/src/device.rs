//! Typed instruction set for the fingerprint module
//!
//! Each method sends one command packet and interprets the acknowledgement.
//! The confirmation code is the first byte of every ack payload.

use tracing::{debug, trace};

use crate::error::{Result, SensorError};
use crate::packet::{read_packet, Packet, PacketKind};
use crate::transport::SerialLink;

/// Instruction codes
pub mod instruction {
    pub const GEN_IMG: u8 = 0x01;
    pub const IMG_2_TZ: u8 = 0x02;
    pub const MATCH: u8 = 0x03;
    pub const SEARCH: u8 = 0x04;
    pub const REG_MODEL: u8 = 0x05;
    pub const STORE: u8 = 0x06;
    pub const LOAD_CHAR: u8 = 0x07;
    pub const UP_CHAR: u8 = 0x08;
    pub const EMPTY: u8 = 0x0D;
    pub const READ_SYS_PARA: u8 = 0x0F;
    pub const VERIFY_PASSWORD: u8 = 0x13;
    pub const TEMPLATE_NUM: u8 = 0x1D;
    pub const READ_INDEX_TABLE: u8 = 0x1F;
}

/// Confirmation codes
pub mod code {
    pub const OK: u8 = 0x00;
    pub const PACKET_ERROR: u8 = 0x01;
    pub const NO_FINGER: u8 = 0x02;
    pub const IMAGE_FAIL: u8 = 0x03;
    pub const IMAGE_MESSY: u8 = 0x06;
    pub const TOO_FEW_POINTS: u8 = 0x07;
    pub const NO_MATCH: u8 = 0x08;
    pub const NOT_FOUND: u8 = 0x09;
    pub const COMBINE_FAIL: u8 = 0x0A;
    pub const BAD_POSITION: u8 = 0x0B;
    pub const LOAD_FAIL: u8 = 0x0C;
    pub const WRONG_PASSWORD: u8 = 0x13;
}

/// Index table pages (256 slots each)
const INDEX_PAGES: u8 = 4;

/// On-board characteristics buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CharBuffer {
    One = 0x01,
    Two = 0x02,
}

impl CharBuffer {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(CharBuffer::One),
            0x02 => Some(CharBuffer::Two),
            _ => None,
        }
    }
}

/// Command-level view of one open link
pub struct Sensor<L: SerialLink> {
    link: L,
    address: u32,
    password: u32,
}

impl<L: SerialLink> Sensor<L> {
    pub fn new(link: L, address: u32, password: u32) -> Self {
        Self {
            link,
            address,
            password,
        }
    }

    /// Handshake: returns false when the module rejects the password
    pub fn verify_password(&mut self) -> Result<bool> {
        let mut payload = vec![instruction::VERIFY_PASSWORD];
        payload.extend_from_slice(&self.password.to_be_bytes());

        let ack = self.exchange(&payload)?;
        match ack[0] {
            code::OK => Ok(true),
            code::WRONG_PASSWORD => Ok(false),
            c => Err(device_error("VerifyPassword", c)),
        }
    }

    /// Capture an image; false when no finger is on the window
    pub fn read_image(&mut self) -> Result<bool> {
        let ack = self.exchange(&[instruction::GEN_IMG])?;
        match ack[0] {
            code::OK => Ok(true),
            code::NO_FINGER => Ok(false),
            c => Err(device_error("GenImg", c)),
        }
    }

    /// Convert the captured image into characteristics in `buffer`
    ///
    /// Returns false when the image is too poor to extract features from;
    /// callers treat that as a failed capture and try again.
    pub fn convert_image(&mut self, buffer: CharBuffer) -> Result<bool> {
        let ack = self.exchange(&[instruction::IMG_2_TZ, buffer as u8])?;
        match ack[0] {
            code::OK => Ok(true),
            code::IMAGE_MESSY | code::TOO_FEW_POINTS => Ok(false),
            c => Err(device_error("Img2Tz", c)),
        }
    }

    /// Compare both buffers; 0 means no match
    pub fn compare_characteristics(&mut self) -> Result<u16> {
        let ack = self.exchange(&[instruction::MATCH])?;
        match ack[0] {
            code::OK => read_u16(&ack, 1, "Match"),
            code::NO_MATCH => Ok(0),
            c => Err(device_error("Match", c)),
        }
    }

    /// Merge both buffers into a template (left in both buffers)
    pub fn create_template(&mut self) -> Result<()> {
        let ack = self.exchange(&[instruction::REG_MODEL])?;
        expect_ok("RegModel", ack[0])
    }

    /// Store buffer One at `position`, or at the first free slot if `None`
    pub fn store_template(&mut self, position: Option<u16>) -> Result<u16> {
        let position = match position {
            Some(p) => p,
            None => self.first_free_position()?.ok_or(SensorError::LibraryFull)?,
        };

        let mut payload = vec![instruction::STORE, CharBuffer::One as u8];
        payload.extend_from_slice(&position.to_be_bytes());

        let ack = self.exchange(&payload)?;
        expect_ok("Store", ack[0])?;
        debug!("Stored template at position {}", position);
        Ok(position)
    }

    /// Search the whole library for buffer `buffer`
    ///
    /// Returns `(position, score)` for the best match.
    pub fn search_template(&mut self, buffer: CharBuffer) -> Result<Option<(u16, u16)>> {
        let capacity = self.storage_capacity()?;

        let mut payload = vec![instruction::SEARCH, buffer as u8, 0x00, 0x00];
        payload.extend_from_slice(&capacity.to_be_bytes());

        let ack = self.exchange(&payload)?;
        match ack[0] {
            code::OK => {
                let position = read_u16(&ack, 1, "Search")?;
                let score = read_u16(&ack, 3, "Search")?;
                Ok(Some((position, score)))
            }
            code::NOT_FOUND => Ok(None),
            c => Err(device_error("Search", c)),
        }
    }

    /// Load the template at `position` into `buffer`
    pub fn load_template(&mut self, position: u16, buffer: CharBuffer) -> Result<()> {
        let mut payload = vec![instruction::LOAD_CHAR, buffer as u8];
        payload.extend_from_slice(&position.to_be_bytes());

        let ack = self.exchange(&payload)?;
        expect_ok("LoadChar", ack[0])
    }

    /// Download the contents of `buffer`
    ///
    /// The module answers with an ack followed by data packets, the last of
    /// which is marked end-of-data.
    pub fn download_characteristics(&mut self, buffer: CharBuffer) -> Result<Vec<u8>> {
        let ack = self.exchange(&[instruction::UP_CHAR, buffer as u8])?;
        expect_ok("UpChar", ack[0])?;

        let mut characteristics = Vec::new();
        loop {
            let packet = self.receive()?;
            match packet.kind {
                PacketKind::Data => characteristics.extend_from_slice(&packet.payload),
                PacketKind::EndData => {
                    characteristics.extend_from_slice(&packet.payload);
                    break;
                }
                other => {
                    return Err(SensorError::Protocol(format!(
                        "unexpected {:?} packet during characteristics download",
                        other
                    )))
                }
            }
        }

        trace!("Downloaded {} bytes of characteristics", characteristics.len());
        Ok(characteristics)
    }

    /// Delete every stored template
    pub fn clear_database(&mut self) -> Result<()> {
        let ack = self.exchange(&[instruction::EMPTY])?;
        expect_ok("Empty", ack[0])
    }

    /// Number of stored templates
    pub fn template_count(&mut self) -> Result<u16> {
        let ack = self.exchange(&[instruction::TEMPLATE_NUM])?;
        expect_ok("TemplateNum", ack[0])?;
        read_u16(&ack, 1, "TemplateNum")
    }

    /// Library capacity from the system parameters
    pub fn storage_capacity(&mut self) -> Result<u16> {
        let ack = self.exchange(&[instruction::READ_SYS_PARA])?;
        expect_ok("ReadSysPara", ack[0])?;
        // status register (2), system id (2), capacity (2), ...
        read_u16(&ack, 5, "ReadSysPara")
    }

    fn first_free_position(&mut self) -> Result<Option<u16>> {
        let capacity = self.storage_capacity()?;

        for page in 0..INDEX_PAGES {
            let ack = self.exchange(&[instruction::READ_INDEX_TABLE, page])?;
            expect_ok("ReadIndexTable", ack[0])?;

            for (byte_index, byte) in ack[1..].iter().enumerate() {
                for bit in 0..8u16 {
                    let position = page as u16 * 256 + byte_index as u16 * 8 + bit;
                    if position >= capacity {
                        return Ok(None);
                    }
                    if byte & (1 << bit) == 0 {
                        return Ok(Some(position));
                    }
                }
            }
        }

        Ok(None)
    }

    fn exchange(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.send(payload)?;
        let packet = self.receive()?;
        if packet.kind != PacketKind::Ack {
            return Err(SensorError::Protocol(format!(
                "expected ack, got {:?}",
                packet.kind
            )));
        }
        if packet.payload.is_empty() {
            return Err(SensorError::Protocol("empty ack".to_string()));
        }
        Ok(packet.payload)
    }

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let packet = Packet::new(self.address, PacketKind::Command, payload.to_vec());
        self.link.write_all(&packet.to_bytes())?;
        self.link.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Packet> {
        let packet = read_packet(&mut self.link)?;
        if packet.address != self.address {
            return Err(SensorError::Protocol(format!(
                "reply from address 0x{:08X}, expected 0x{:08X}",
                packet.address, self.address
            )));
        }
        Ok(packet)
    }
}

fn expect_ok(instruction: &'static str, code: u8) -> Result<()> {
    if code == code::OK {
        Ok(())
    } else {
        Err(device_error(instruction, code))
    }
}

fn device_error(instruction: &'static str, code: u8) -> SensorError {
    SensorError::Device { instruction, code }
}

fn read_u16(payload: &[u8], offset: usize, instruction: &str) -> Result<u16> {
    payload
        .get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| SensorError::Protocol(format!("{} ack too short", instruction)))
}
