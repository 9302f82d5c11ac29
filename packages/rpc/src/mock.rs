//! In-memory transport that records every response on a shared byte wire.

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::{Reply, Request, ServerTransport};

const CHUNK_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub service_method: String,
    pub seq: u64,
    pub error: String,
}

/// One response as read back from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub service_method: String,
    pub seq: u64,
    pub error: String,
    pub body: Vec<u8>,
}

/// Length prefixed bincode framing: `[u32 len][header][u32 len][body]`.
#[derive(Debug, Default)]
pub struct MemCodec;

impl MemCodec {
    pub fn encode(&self, header: &FrameHeader, body: &[u8]) -> Result<Vec<u8>, bincode::Error> {
        let header = bincode::serialize(header)?;
        let mut buf = Vec::with_capacity(8 + header.len() + body.len());
        buf.extend_from_slice(&(header.len() as u32).to_le_bytes());
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(body);
        Ok(buf)
    }

    pub fn decode_all(&self, mut wire: &[u8]) -> Result<Vec<Frame>, bincode::Error> {
        let mut frames = vec![];
        while !wire.is_empty() {
            let (header, rest) = Self::split_part(wire)?;
            let (body, rest) = Self::split_part(rest)?;
            let header: FrameHeader = bincode::deserialize(header)?;
            frames.push(Frame {
                service_method: header.service_method,
                seq: header.seq,
                error: header.error,
                body: body.to_vec(),
            });
            wire = rest;
        }
        Ok(frames)
    }

    fn split_part(buf: &[u8]) -> Result<(&[u8], &[u8]), bincode::Error> {
        let truncated = || Box::new(bincode::ErrorKind::Custom("truncated frame".to_string()));
        if buf.len() < 4 {
            return Err(truncated());
        }
        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let rest = &buf[4..];
        if rest.len() < len {
            return Err(truncated());
        }
        Ok(rest.split_at(len))
    }
}

/// Writes each response in small chunks, so responses would interleave on the wire without the
/// connection's write lock.
#[derive(Debug, Default)]
pub struct MemTransport {
    wire: Mutex<Vec<u8>>,
    freed: Mutex<Vec<u64>>,
}

impl MemTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Result<Vec<Frame>, bincode::Error> {
        MemCodec.decode_all(&self.wire.lock())
    }

    /// Sequence numbers released so far, in release order.
    pub fn freed(&self) -> Vec<u64> {
        self.freed.lock().clone()
    }

    fn write(&self, buf: &[u8]) {
        for chunk in buf.chunks(CHUNK_SIZE) {
            self.wire.lock().extend_from_slice(chunk);
            std::thread::yield_now();
        }
    }
}

impl ServerTransport for MemTransport {
    type Codec = MemCodec;

    fn send_response(&self, _sending: &MutexGuard<'_, ()>, req: &Request, reply: &Reply, codec: &MemCodec, errmsg: &str) {
        let mut header = FrameHeader {
            service_method: req.service_method.clone(),
            seq: req.seq,
            error: errmsg.to_string(),
        };
        let body = if errmsg.is_empty() {
            match reply.encode() {
                Ok(body) => body,
                Err(err) => {
                    log::error!("[MemTransport] encode reply for seq {} error {}", req.seq, err);
                    header.error = err.to_string();
                    vec![]
                }
            }
        } else {
            vec![]
        };
        match codec.encode(&header, &body) {
            Ok(frame) => self.write(&frame),
            Err(err) => log::error!("[MemTransport] encode frame for seq {} error {}", req.seq, err),
        }
    }

    fn free_request(&self, req: Request) {
        self.freed.lock().push(req.seq);
    }
}
