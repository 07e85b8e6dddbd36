//! Short APDU encoding with command chaining
//!
//! Payloads longer than 255 bytes are split into chained commands with the
//! chaining bit (`CLA | 0x10`) set on every block but the last.

use super::StatusWord;
use crate::error::ProtocolError;

const SHORT_MAX: usize = 255;
const CLA_CHAINING: u8 = 0x10;

/// A command APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    pub le: Option<u8>,
}

impl Command {
    pub fn new(ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla: 0x00,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    pub fn is_chained(&self) -> bool {
        self.cla & CLA_CHAINING != 0
    }

    /// Encode a single short APDU; callers must chain payloads above 255 bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(6 + self.data.len());
        buffer.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);
        if !self.data.is_empty() {
            buffer.push(self.data.len() as u8);
            buffer.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            buffer.push(le);
        }
        buffer
    }

    /// Split into the commands actually sent on the wire
    pub fn chain(&self) -> Vec<Command> {
        if self.data.len() <= SHORT_MAX {
            return vec![self.clone()];
        }
        let chunks: Vec<&[u8]> = self.data.chunks(SHORT_MAX).collect();
        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| Command {
                cla: if i == last {
                    self.cla
                } else {
                    self.cla | CLA_CHAINING
                },
                ins: self.ins,
                p1: self.p1,
                p2: self.p2,
                data: chunk.to_vec(),
                le: if i == last { self.le } else { None },
            })
            .collect()
    }

    /// Decode a short APDU received by a card
    pub fn from_bytes(raw: &[u8]) -> Result<Self, ProtocolError> {
        let malformed = |reason: &str| ProtocolError::MalformedResponse {
            operation: "command",
            reason: reason.to_string(),
        };
        if raw.len() < 4 {
            return Err(malformed("header shorter than 4 bytes"));
        }
        let mut command = Command {
            cla: raw[0],
            ins: raw[1],
            p1: raw[2],
            p2: raw[3],
            data: Vec::new(),
            le: None,
        };
        let body = &raw[4..];
        match body.len() {
            0 => {}
            1 => command.le = Some(body[0]),
            _ => {
                let lc = body[0] as usize;
                if body.len() < 1 + lc {
                    return Err(malformed("Lc exceeds body"));
                }
                command.data = body[1..1 + lc].to_vec();
                match body.len() - 1 - lc {
                    0 => {}
                    1 => command.le = Some(body[1 + lc]),
                    _ => return Err(malformed("trailing bytes after Le")),
                }
            }
        }
        Ok(command)
    }
}

/// A response APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub data: Vec<u8>,
    pub sw: StatusWord,
}

impl Response {
    pub fn new(data: Vec<u8>, sw: StatusWord) -> Self {
        Self { data, sw }
    }

    pub fn status(sw: StatusWord) -> Self {
        Self::new(Vec::new(), sw)
    }

    pub fn success(data: Vec<u8>) -> Self {
        Self::new(data, StatusWord::SUCCESS)
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, ProtocolError> {
        if raw.len() < 2 {
            return Err(ProtocolError::MalformedResponse {
                operation: "response",
                reason: format!("{} bytes is too short for a status word", raw.len()),
            });
        }
        let (data, sw) = raw.split_at(raw.len() - 2);
        Ok(Self {
            data: data.to_vec(),
            sw: StatusWord::from_bytes(sw[0], sw[1]),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.data.len() + 2);
        buffer.extend_from_slice(&self.data);
        buffer.push(self.sw.sw1());
        buffer.push(self.sw.sw2());
        buffer
    }
}
