use core::str;
use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Deref;

use anyhow::Context;

/// RFC1035: labels are limited to 63 octets
const MAX_LABEL_LENGTH: usize = 0x3f;
/// Compression pointers carry a 14-bit offset
const MAX_POINTER_OFFSET: usize = 0x3fff;
/// Upper bound on pointers followed while decoding a single name
const MAX_COMPRESSION_JUMPS: usize = 32;

pub trait FromBuf: Sized {
    fn from_buf(buf: &mut ByteBuf<'_>) -> anyhow::Result<Self>;
}

pub trait EncodeToBuf {
    fn encode_to_buf(&self, buf: &mut ByteBuf<'_>) -> anyhow::Result<()>;
}

/// A byte buffer used both for decoding received messages and for encoding new ones.
///
/// Reads advance an internal cursor. Writes always append, except for `set_u16`, which
/// patches already written bytes (e.g. an RDLENGTH that is only known afterwards).
pub struct ByteBuf<'a> {
    buf: Cow<'a, [u8]>,
    pos: usize,
    /// Offsets of the names written so far, reused as compression targets
    names: HashMap<String, u16>,
}

impl Deref for ByteBuf<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.buf.as_ref()
    }
}

impl AsRef<[u8]> for ByteBuf<'_> {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl<'a> ByteBuf<'a> {
    pub fn new(src: &'a [u8]) -> ByteBuf<'a> {
        ByteBuf {
            buf: Cow::Borrowed(src),
            pos: 0,
            names: HashMap::new(),
        }
    }

    pub fn new_empty(capacity: Option<usize>) -> ByteBuf<'static> {
        ByteBuf {
            buf: Cow::Owned(Vec::with_capacity(capacity.unwrap_or(512))),
            pos: 0,
            names: HashMap::new(),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf.into_owned()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) -> anyhow::Result<()> {
        if pos > self.buf.len() {
            anyhow::bail!("position {} is past the end of the buffer ({} bytes)", pos, self.buf.len());
        }
        self.pos = pos;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn read_u8(&mut self) -> anyhow::Result<u8> {
        self.read_bytes(1).map(|bytes| bytes[0])
    }

    pub fn read_u16(&mut self) -> anyhow::Result<u16> {
        self.read_array::<2>().map(u16::from_be_bytes)
    }

    pub fn read_u32(&mut self) -> anyhow::Result<u32> {
        self.read_array::<4>().map(u32::from_be_bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> anyhow::Result<[u8; N]> {
        self.read_bytes(N)
            .and_then(|bytes| TryInto::<[u8; N]>::try_into(bytes).context("bug: unexpected slice length"))
    }

    pub fn read_bytes(&mut self, n: usize) -> anyhow::Result<&[u8]> {
        if self.remaining() < n {
            anyhow::bail!(
                "underlying buffer is too small: {} bytes requested at byte {}, {} available",
                n,
                self.pos,
                self.remaining()
            );
        }
        let pos = self.pos;
        self.pos += n;
        Ok(&self.buf[pos..pos + n])
    }

    pub fn write_u8(&mut self, data: u8) {
        self.buf.to_mut().push(data);
    }

    pub fn write_u16(&mut self, data: u16) {
        self.write_bytes(&data.to_be_bytes());
    }

    pub fn write_u32(&mut self, data: u32) {
        self.write_bytes(&data.to_be_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.to_mut().extend_from_slice(data);
    }

    pub fn set_u16(&mut self, pos: usize, data: u16) -> anyhow::Result<()> {
        let target = self
            .buf
            .to_mut()
            .get_mut(pos..pos + 2)
            .with_context(|| format!("can't overwrite bytes {}..{}: not written yet", pos, pos + 2))?;
        target.copy_from_slice(&data.to_be_bytes());
        Ok(())
    }

    /// Reads a possibly compressed domain name. The returned name has no trailing dot.
    pub fn read_qname(&mut self) -> anyhow::Result<String> {
        let (qname, next_pos) = decode_qname(&self.buf, self.pos)?;
        self.pos = next_pos;
        Ok(qname)
    }

    /// Writes a domain name, replacing it with a pointer if the exact same name was written before.
    pub fn write_qname(&mut self, qname: &str) -> anyhow::Result<()> {
        let qname = qname.strip_suffix('.').unwrap_or(qname);
        if qname.is_empty() {
            self.write_u8(0);
            return Ok(());
        }

        if let Some(&offset) = self.names.get(qname) {
            self.write_u16(0xc000 | offset);
            return Ok(());
        }

        let start = self.buf.len();
        for label in qname.split('.') {
            if label.is_empty() {
                anyhow::bail!("empty label in '{}'", qname);
            }
            if label.len() > MAX_LABEL_LENGTH {
                anyhow::bail!("label is too long ({}): {}", label.len(), label);
            }
            self.write_u8(label.len() as u8);
            self.write_bytes(label.as_bytes());
        }
        self.write_u8(0);

        if start <= MAX_POINTER_OFFSET {
            self.names.insert(qname.to_owned(), start as u16);
        }

        Ok(())
    }
}

fn decode_qname(buf: &[u8], start: usize) -> anyhow::Result<(String, usize)> {
    let mut qname = String::new();
    let mut pos = start;
    // Where the caller continues reading once a pointer has been followed
    let mut resume_at = None;
    let mut jumps = 0;

    loop {
        let label_length = *buf
            .get(pos)
            .with_context(|| format!("malformed packet: expected QNAME label length at byte {}", pos))?;

        match label_length & 0xc0 {
            0xc0 => {
                let second_byte = *buf
                    .get(pos + 1)
                    .context("malformed packet: expected second jump ptr byte in QNAME")?;
                jumps += 1;
                if jumps > MAX_COMPRESSION_JUMPS {
                    anyhow::bail!("malformed packet: compression loop in QNAME at byte {}", start);
                }
                resume_at.get_or_insert(pos + 2);
                pos = ((label_length as usize & 0x3f) << 8) | second_byte as usize;
            }
            0x00 => {
                pos += 1;
                if label_length == 0 {
                    break;
                }

                let label = buf.get(pos..pos + label_length as usize).with_context(|| {
                    format!(
                        "malformed packet: expected label of length {} at byte {}",
                        label_length, pos
                    )
                })?;
                let label = str::from_utf8(label)
                    .with_context(|| format!("malformed packet: QNAME label at byte {} is not UTF-8", pos))?;

                if !qname.is_empty() {
                    qname.push('.');
                }
                qname.push_str(label);
                pos += label_length as usize;
            }
            _ => anyhow::bail!(
                "malformed packet: unsupported label type {:#04x} at byte {}",
                label_length,
                pos
            ),
        }
    }

    Ok((qname, resume_at.unwrap_or(pos)))
}
