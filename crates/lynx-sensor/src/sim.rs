//! In-memory fingerprint module
//!
//! Speaks the same packet protocol as the hardware so the driver can be
//! exercised without a device. A "finger" is just its characteristics bytes:
//! placing one queues it for the next image capture, and two captures match
//! iff their bytes are equal.

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::device::{code, instruction, CharBuffer};
use crate::error::{Result, SensorError};
use crate::packet::{Packet, PacketKind, CHECKSUM_SIZE, DEFAULT_ADDRESS, HEADER_SIZE, MAX_PAYLOAD};
use crate::transport::LinkOpener;

/// Library slots on an R307
const DEFAULT_CAPACITY: u16 = 1000;

/// Score reported for an exact match
const DEFAULT_MATCH_SCORE: u16 = 100;

/// Data packet size used for characteristics upload
const DATA_CHUNK: usize = 128;

struct SimState {
    address: u32,
    password: u32,
    capacity: u16,
    match_score: u16,
    placements: VecDeque<Vec<u8>>,
    image: Option<Vec<u8>>,
    buffers: [Option<Vec<u8>>; 2],
    library: BTreeMap<u16, Vec<u8>>,
    fail_next: u32,
    capture_attempts: usize,
    open_links: usize,
    unplugged: bool,
}

impl SimState {
    fn new(capacity: u16) -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            password: 0,
            capacity,
            match_score: DEFAULT_MATCH_SCORE,
            placements: VecDeque::new(),
            image: None,
            buffers: [None, None],
            library: BTreeMap::new(),
            fail_next: 0,
            capture_attempts: 0,
            open_links: 0,
            unplugged: false,
        }
    }

    fn ack(&self, payload: Vec<u8>) -> Packet {
        Packet::new(self.address, PacketKind::Ack, payload)
    }

    fn first_free(&self) -> Option<u16> {
        (0..self.capacity).find(|p| !self.library.contains_key(p))
    }

    fn buffer(&self, id: u8) -> Option<&Vec<u8>> {
        let slot = CharBuffer::from_byte(id)? as usize - 1;
        self.buffers[slot].as_ref()
    }

    fn set_buffer(&mut self, id: u8, data: Vec<u8>) -> bool {
        match CharBuffer::from_byte(id) {
            Some(buffer) => {
                self.buffers[buffer as usize - 1] = Some(data);
                true
            }
            None => false,
        }
    }

    fn handle(&mut self, packet: Packet) -> Vec<Packet> {
        if packet.kind != PacketKind::Command || packet.payload.is_empty() {
            return vec![self.ack(vec![code::PACKET_ERROR])];
        }

        if self.fail_next > 0 {
            self.fail_next -= 1;
            return vec![self.ack(vec![code::PACKET_ERROR])];
        }

        let args = &packet.payload[1..];
        match packet.payload[0] {
            instruction::GEN_IMG => {
                self.capture_attempts += 1;
                match self.placements.pop_front() {
                    Some(image) => {
                        self.image = Some(image);
                        vec![self.ack(vec![code::OK])]
                    }
                    None => vec![self.ack(vec![code::NO_FINGER])],
                }
            }
            instruction::IMG_2_TZ => {
                let Some(&id) = args.first() else {
                    return vec![self.ack(vec![code::PACKET_ERROR])];
                };
                let reply = match self.image.clone() {
                    None => code::IMAGE_FAIL,
                    Some(image) if image.is_empty() => code::TOO_FEW_POINTS,
                    Some(image) => {
                        if self.set_buffer(id, image) {
                            code::OK
                        } else {
                            code::PACKET_ERROR
                        }
                    }
                };
                vec![self.ack(vec![reply])]
            }
            instruction::MATCH => match (&self.buffers[0], &self.buffers[1]) {
                (Some(a), Some(b)) if a == b => {
                    let mut payload = vec![code::OK];
                    payload.extend_from_slice(&self.match_score.to_be_bytes());
                    vec![self.ack(payload)]
                }
                _ => vec![self.ack(vec![code::NO_MATCH])],
            },
            instruction::REG_MODEL => match (&self.buffers[0], &self.buffers[1]) {
                (Some(a), Some(b)) if a == b => {
                    let template = a.clone();
                    self.buffers = [Some(template.clone()), Some(template)];
                    vec![self.ack(vec![code::OK])]
                }
                _ => vec![self.ack(vec![code::COMBINE_FAIL])],
            },
            instruction::STORE => {
                let (Some(&id), Some(position)) = (args.first(), arg_u16(args, 1)) else {
                    return vec![self.ack(vec![code::PACKET_ERROR])];
                };
                if position >= self.capacity {
                    return vec![self.ack(vec![code::BAD_POSITION])];
                }
                match self.buffer(id).cloned() {
                    Some(template) => {
                        self.library.insert(position, template);
                        vec![self.ack(vec![code::OK])]
                    }
                    None => vec![self.ack(vec![code::PACKET_ERROR])],
                }
            }
            instruction::SEARCH => {
                let (Some(&id), Some(start), Some(count)) =
                    (args.first(), arg_u16(args, 1), arg_u16(args, 3))
                else {
                    return vec![self.ack(vec![code::PACKET_ERROR])];
                };
                let Some(captured) = self.buffer(id) else {
                    return vec![self.ack(vec![code::PACKET_ERROR])];
                };
                let end = start.saturating_add(count);
                let hit = self
                    .library
                    .range(start..end)
                    .find(|(_, template)| *template == captured)
                    .map(|(position, _)| *position);

                match hit {
                    Some(position) => {
                        let mut payload = vec![code::OK];
                        payload.extend_from_slice(&position.to_be_bytes());
                        payload.extend_from_slice(&self.match_score.to_be_bytes());
                        vec![self.ack(payload)]
                    }
                    None => vec![self.ack(vec![code::NOT_FOUND])],
                }
            }
            instruction::LOAD_CHAR => {
                let (Some(&id), Some(position)) = (args.first(), arg_u16(args, 1)) else {
                    return vec![self.ack(vec![code::PACKET_ERROR])];
                };
                let loaded = match self.library.get(&position).cloned() {
                    Some(template) => self.set_buffer(id, template),
                    None => false,
                };
                let reply = if loaded { code::OK } else { code::LOAD_FAIL };
                vec![self.ack(vec![reply])]
            }
            instruction::UP_CHAR => {
                let Some(data) = args.first().and_then(|id| self.buffer(*id)).cloned() else {
                    return vec![self.ack(vec![code::PACKET_ERROR])];
                };
                let mut replies = vec![self.ack(vec![code::OK])];
                let chunks: Vec<&[u8]> = data.chunks(DATA_CHUNK).collect();
                if chunks.is_empty() {
                    replies.push(Packet::new(self.address, PacketKind::EndData, Vec::new()));
                }
                for (i, chunk) in chunks.iter().enumerate() {
                    let kind = if i + 1 == chunks.len() {
                        PacketKind::EndData
                    } else {
                        PacketKind::Data
                    };
                    replies.push(Packet::new(self.address, kind, chunk.to_vec()));
                }
                replies
            }
            instruction::EMPTY => {
                self.library.clear();
                vec![self.ack(vec![code::OK])]
            }
            instruction::READ_SYS_PARA => {
                let mut payload = vec![code::OK];
                payload.extend_from_slice(&[0x00, 0x00]); // status register
                payload.extend_from_slice(&[0x00, 0x00]); // system id
                payload.extend_from_slice(&self.capacity.to_be_bytes());
                payload.extend_from_slice(&[0x00, 0x03]); // security level
                payload.extend_from_slice(&self.address.to_be_bytes());
                payload.extend_from_slice(&[0x00, 0x02]); // 128-byte packets
                payload.extend_from_slice(&[0x00, 0x0C]); // 115200 / 9600
                vec![self.ack(payload)]
            }
            instruction::VERIFY_PASSWORD => match args.get(0..4) {
                Some(b) if u32::from_be_bytes([b[0], b[1], b[2], b[3]]) == self.password => {
                    vec![self.ack(vec![code::OK])]
                }
                Some(_) => vec![self.ack(vec![code::WRONG_PASSWORD])],
                None => vec![self.ack(vec![code::PACKET_ERROR])],
            },
            instruction::TEMPLATE_NUM => {
                let mut payload = vec![code::OK];
                payload.extend_from_slice(&(self.library.len() as u16).to_be_bytes());
                vec![self.ack(payload)]
            }
            instruction::READ_INDEX_TABLE => {
                let Some(&page) = args.first() else {
                    return vec![self.ack(vec![code::PACKET_ERROR])];
                };
                let base = page as u16 * 256;
                let mut bitmap = [0u8; 32];
                for position in self.library.keys() {
                    if (base..base.saturating_add(256)).contains(position) {
                        let offset = (position - base) as usize;
                        bitmap[offset / 8] |= 1 << (offset % 8);
                    }
                }
                let mut payload = vec![code::OK];
                payload.extend_from_slice(&bitmap);
                vec![self.ack(payload)]
            }
            _ => vec![self.ack(vec![code::PACKET_ERROR])],
        }
    }
}

fn arg_u16(args: &[u8], offset: usize) -> Option<u16> {
    args.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

/// Control handle for a simulated module
#[derive(Clone)]
pub struct SimulatedSensor {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(capacity))),
        }
    }

    /// Opener that hands out links to this module
    pub fn opener(&self) -> SimOpener {
        SimOpener {
            state: Arc::clone(&self.state),
        }
    }

    /// Queue a finger for the next successful image capture
    pub fn place_finger(&self, characteristics: Vec<u8>) {
        self.lock().placements.push_back(characteristics);
    }

    /// Fingers still waiting to be captured
    pub fn pending_placements(&self) -> usize {
        self.lock().placements.len()
    }

    /// Store a template directly, bypassing enrollment
    pub fn enroll_template(&self, characteristics: Vec<u8>) -> Option<u16> {
        let mut state = self.lock();
        let position = state.first_free()?;
        state.library.insert(position, characteristics);
        Some(position)
    }

    pub fn template_count(&self) -> usize {
        self.lock().library.len()
    }

    /// Links currently open against this module
    pub fn open_links(&self) -> usize {
        self.lock().open_links
    }

    /// Number of image capture commands received
    pub fn capture_attempts(&self) -> usize {
        self.lock().capture_attempts
    }

    pub fn set_password(&self, password: u32) {
        self.lock().password = password;
    }

    pub fn set_match_score(&self, score: u16) {
        self.lock().match_score = score;
    }

    /// Answer the next `count` commands with a packet error
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_next = count;
    }

    /// Simulate pulling the cable: IO fails and new opens are refused
    pub fn set_unplugged(&self, unplugged: bool) {
        self.lock().unplugged = unplugged;
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// [`LinkOpener`] for a [`SimulatedSensor`]
#[derive(Clone)]
pub struct SimOpener {
    state: Arc<Mutex<SimState>>,
}

impl LinkOpener for SimOpener {
    type Link = SimLink;

    fn open(&self) -> Result<SimLink> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.unplugged {
            return Err(SensorError::Connection("simulated sensor unplugged".to_string()));
        }
        state.open_links += 1;
        Ok(SimLink {
            state: Arc::clone(&self.state),
            inbound: Vec::new(),
            outbound: VecDeque::new(),
        })
    }

    fn describe(&self) -> String {
        "simulated sensor".to_string()
    }
}

/// One open link to a simulated module
pub struct SimLink {
    state: Arc<Mutex<SimState>>,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
}

impl SimLink {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Process every complete command frame received so far
    fn pump(&mut self) {
        while self.inbound.len() >= HEADER_SIZE {
            let length = u16::from_be_bytes([self.inbound[7], self.inbound[8]]) as usize;
            if length > MAX_PAYLOAD + CHECKSUM_SIZE {
                self.inbound.clear();
                let reply = self.lock().ack(vec![code::PACKET_ERROR]);
                self.outbound.extend(reply.to_bytes());
                return;
            }

            let total = HEADER_SIZE + length;
            if self.inbound.len() < total {
                return;
            }

            let frame: Vec<u8> = self.inbound.drain(..total).collect();
            let replies = {
                let mut state = self.lock();
                match Packet::decode(&frame) {
                    Ok((packet, _)) => state.handle(packet),
                    Err(_) => vec![state.ack(vec![code::PACKET_ERROR])],
                }
            };
            for reply in replies {
                self.outbound.extend(reply.to_bytes());
            }
        }
    }
}

impl Write for SimLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.lock().unplugged {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sensor unplugged"));
        }
        self.inbound.extend_from_slice(buf);
        self.pump();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for SimLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.lock().unplugged {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sensor unplugged"));
        }
        if self.outbound.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no response pending"));
        }
        let n = buf.len().min(self.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Drop for SimLink {
    fn drop(&mut self) {
        let mut state = self.lock();
        state.open_links = state.open_links.saturating_sub(1);
    }
}
