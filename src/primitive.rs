//! Endian-aware primitive reads/writes over a random-access file.
//!
//! ELF primitives are decoded here through a runtime [`ElfDataEncoding`] tag
//! and plain `read_exact`/`write_all` calls rather than const-generic,
//! parse-once-into-an-owned-tree decoding: this tool mutates specific byte
//! ranges of an already-open file whose class and encoding are only known at
//! runtime, chosen per invocation rather than fixed at compile time.

use crate::ident::ElfDataEncoding;
use crate::Result;
use std::io::{Read, Seek, SeekFrom, Write};

/// Reads and writes fixed-size little/big-endian integers at arbitrary file
/// offsets, without needing to know anything about ELF beyond byte order.
#[derive(Debug, Clone, Copy)]
pub struct Endian(pub ElfDataEncoding);

impl Endian {
    /// Reads a `u16` at the current stream position.
    pub fn read_u16<R: Read>(&self, r: &mut R) -> Result<u16> {
        let mut buf = [0u8; 2];
        r.read_exact(&mut buf)?;
        Ok(match self.0 {
            ElfDataEncoding::LittleEndian => u16::from_le_bytes(buf),
            ElfDataEncoding::BigEndian => u16::from_be_bytes(buf),
        })
    }

    /// Reads a `u32` at the current stream position.
    pub fn read_u32<R: Read>(&self, r: &mut R) -> Result<u32> {
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf)?;
        Ok(match self.0 {
            ElfDataEncoding::LittleEndian => u32::from_le_bytes(buf),
            ElfDataEncoding::BigEndian => u32::from_be_bytes(buf),
        })
    }

    /// Reads an `i32` at the current stream position.
    pub fn read_i32<R: Read>(&self, r: &mut R) -> Result<i32> {
        Ok(self.read_u32(r)? as i32)
    }

    /// Reads a `u64` at the current stream position.
    pub fn read_u64<R: Read>(&self, r: &mut R) -> Result<u64> {
        let mut buf = [0u8; 8];
        r.read_exact(&mut buf)?;
        Ok(match self.0 {
            ElfDataEncoding::LittleEndian => u64::from_le_bytes(buf),
            ElfDataEncoding::BigEndian => u64::from_be_bytes(buf),
        })
    }

    /// Reads an `i64` at the current stream position.
    pub fn read_i64<R: Read>(&self, r: &mut R) -> Result<i64> {
        Ok(self.read_u64(r)? as i64)
    }

    /// Writes a `u16` at the current stream position.
    pub fn write_u16<W: Write>(&self, w: &mut W, value: u16) -> Result<()> {
        let buf = match self.0 {
            ElfDataEncoding::LittleEndian => value.to_le_bytes(),
            ElfDataEncoding::BigEndian => value.to_be_bytes(),
        };
        w.write_all(&buf)?;
        Ok(())
    }

    /// Writes a `u32` at the current stream position.
    pub fn write_u32<W: Write>(&self, w: &mut W, value: u32) -> Result<()> {
        let buf = match self.0 {
            ElfDataEncoding::LittleEndian => value.to_le_bytes(),
            ElfDataEncoding::BigEndian => value.to_be_bytes(),
        };
        w.write_all(&buf)?;
        Ok(())
    }

    /// Writes an `i32` at the current stream position.
    pub fn write_i32<W: Write>(&self, w: &mut W, value: i32) -> Result<()> {
        self.write_u32(w, value as u32)
    }

    /// Writes a `u64` at the current stream position.
    pub fn write_u64<W: Write>(&self, w: &mut W, value: u64) -> Result<()> {
        let buf = match self.0 {
            ElfDataEncoding::LittleEndian => value.to_le_bytes(),
            ElfDataEncoding::BigEndian => value.to_be_bytes(),
        };
        w.write_all(&buf)?;
        Ok(())
    }

    /// Writes an `i64` at the current stream position.
    pub fn write_i64<W: Write>(&self, w: &mut W, value: i64) -> Result<()> {
        self.write_u64(w, value as u64)
    }

    /// Reads a `u32`/`u64` depending on `is64`, widening 32-bit results.
    pub fn read_word_sized<R: Read>(&self, r: &mut R, is64: bool) -> Result<u64> {
        if is64 {
            self.read_u64(r)
        } else {
            self.read_u32(r).map(u64::from)
        }
    }

    /// Writes the low bits of `value` as a `u32`/`u64` depending on `is64`.
    pub fn write_word_sized<W: Write>(&self, w: &mut W, is64: bool, value: u64) -> Result<()> {
        if is64 {
            self.write_u64(w, value)
        } else {
            self.write_u32(w, value as u32)
        }
    }
}

/// Reads a NUL-terminated string starting at `offset` in `stream`, restoring
/// the stream's original position afterwards.
pub fn read_cstring_at<S: Read + Seek>(stream: &mut S, offset: u64) -> Result<Vec<u8>> {
    let saved = stream.stream_position()?;
    stream.seek(SeekFrom::Start(offset))?;
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        out.push(byte[0]);
    }
    stream.seek(SeekFrom::Start(saved))?;
    Ok(out)
}
