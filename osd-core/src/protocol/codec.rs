//! Binary frame encoding.
//!
//! A frame on the wire is a little-endian `u32` length followed by that
//! many bytes: `dest: u16`, `src: u16`, `tag: u8` and the body fields, all
//! little-endian. Variable-size payloads carry their own `u32` length.

use super::{Body, Frame, ModuleId, StopReason};
use crate::error::CodecError;
use std::io::{self, Read, Write};

/// Largest encoded frame accepted, excluding the length prefix.
pub const MAX_FRAME_LEN: usize = 64 * 1024 + 32;

/// Largest memory payload carried by one frame. The memory header (ids,
/// tag, address and payload length) fits in the rest of `MAX_FRAME_LEN`.
pub const MAX_MEM_PAYLOAD: usize = 64 * 1024;

const TAG_REG_READ: u8 = 0x01;
const TAG_REG_WRITE: u8 = 0x02;
const TAG_REG_VALUE: u8 = 0x03;
const TAG_ACK: u8 = 0x04;
const TAG_NACK: u8 = 0x05;
const TAG_MEM_WRITE: u8 = 0x06;
const TAG_MEM_READ: u8 = 0x07;
const TAG_MEM_DATA: u8 = 0x08;
const TAG_STM_TRACE: u8 = 0x09;
const TAG_CTM_TRACE: u8 = 0x0a;
const TAG_STOPPED: u8 = 0x0b;

const STOP_EXIT: u8 = 0;
const STOP_HALT: u8 = 1;

/// Encode a frame including its length prefix.
pub fn encode(frame: &Frame) -> Vec<u8> {
    let mut out = vec![0u8; 4];
    out.extend_from_slice(&frame.dest.0.to_le_bytes());
    out.extend_from_slice(&frame.src.0.to_le_bytes());

    match &frame.body {
        Body::RegRead { reg } => {
            out.push(TAG_REG_READ);
            out.extend_from_slice(&reg.to_le_bytes());
        }
        Body::RegWrite { reg, value } => {
            out.push(TAG_REG_WRITE);
            out.extend_from_slice(&reg.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }
        Body::RegValue { reg, value } => {
            out.push(TAG_REG_VALUE);
            out.extend_from_slice(&reg.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }
        Body::Ack => out.push(TAG_ACK),
        Body::Nack { code } => {
            out.push(TAG_NACK);
            out.extend_from_slice(&code.to_le_bytes());
        }
        Body::MemWrite { address, data } => {
            out.push(TAG_MEM_WRITE);
            out.extend_from_slice(&address.to_le_bytes());
            put_bytes(&mut out, data);
        }
        Body::MemRead { address, len } => {
            out.push(TAG_MEM_READ);
            out.extend_from_slice(&address.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
        }
        Body::MemData { address, data } => {
            out.push(TAG_MEM_DATA);
            out.extend_from_slice(&address.to_le_bytes());
            put_bytes(&mut out, data);
        }
        Body::StmTrace { timestamp, id, value } => {
            out.push(TAG_STM_TRACE);
            out.extend_from_slice(&timestamp.to_le_bytes());
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }
        Body::CtmTrace { timestamp, pc } => {
            out.push(TAG_CTM_TRACE);
            out.extend_from_slice(&timestamp.to_le_bytes());
            out.extend_from_slice(&pc.to_le_bytes());
        }
        Body::Stopped { reason } => {
            out.push(TAG_STOPPED);
            let (kind, code) = match reason {
                StopReason::Exit(code) => (STOP_EXIT, *code),
                StopReason::Halt => (STOP_HALT, 0),
            };
            out.push(kind);
            out.extend_from_slice(&code.to_le_bytes());
        }
    }

    let len = u32::try_from(out.len() - 4).unwrap_or(u32::MAX);
    out[..4].copy_from_slice(&len.to_le_bytes());
    out
}

fn put_bytes(out: &mut Vec<u8>, data: &[u8]) {
    let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
}

/// Decode a frame body (everything after the length prefix).
pub fn decode(bytes: &[u8]) -> Result<Frame, CodecError> {
    if bytes.len() > MAX_FRAME_LEN {
        return Err(CodecError::Oversize(bytes.len()));
    }

    let mut cur = Cursor { bytes, pos: 0 };
    let dest = ModuleId(cur.u16()?);
    let src = ModuleId(cur.u16()?);
    let tag = cur.u8()?;

    let body = match tag {
        TAG_REG_READ => Body::RegRead { reg: cur.u16()? },
        TAG_REG_WRITE => Body::RegWrite { reg: cur.u16()?, value: cur.u64()? },
        TAG_REG_VALUE => Body::RegValue { reg: cur.u16()?, value: cur.u64()? },
        TAG_ACK => Body::Ack,
        TAG_NACK => Body::Nack { code: cur.u16()? },
        TAG_MEM_WRITE => Body::MemWrite { address: cur.u64()?, data: cur.bytes()? },
        TAG_MEM_READ => Body::MemRead { address: cur.u64()?, len: cur.u32()? },
        TAG_MEM_DATA => Body::MemData { address: cur.u64()?, data: cur.bytes()? },
        TAG_STM_TRACE => Body::StmTrace { timestamp: cur.u32()?, id: cur.u16()?, value: cur.u64()? },
        TAG_CTM_TRACE => Body::CtmTrace { timestamp: cur.u32()?, pc: cur.u64()? },
        TAG_STOPPED => {
            let kind = cur.u8()?;
            let code = cur.u32()?;
            let reason = match kind {
                STOP_EXIT => StopReason::Exit(code),
                STOP_HALT => StopReason::Halt,
                other => return Err(CodecError::UnknownTag(other)),
            };
            Body::Stopped { reason }
        }
        other => return Err(CodecError::UnknownTag(other)),
    };

    let rest = bytes.len() - cur.pos;
    if rest != 0 {
        return Err(CodecError::TrailingBytes(rest));
    }

    Ok(Frame { dest, src, body })
}

/// Read one length-prefixed frame from a stream.
///
/// Returns `Ok(None)` on a clean end of stream before the length prefix.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Frame>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, CodecError::Oversize(len)));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    decode(&body)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Write one frame to a stream.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> io::Result<()> {
    writer.write_all(&encode(frame))?;
    writer.flush()
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], CodecError> {
        let available = self.bytes.len() - self.pos;
        if available < n {
            return Err(CodecError::Truncated { needed: n, available });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(buf))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.u32()? as usize;
        if len > MAX_FRAME_LEN {
            return Err(CodecError::Oversize(len));
        }
        Ok(self.take(len)?.to_vec())
    }
}
