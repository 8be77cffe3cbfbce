//! Byte, sub-block and code level access to a GIF stream.
use std::io::{self, Read};

use crate::traits::ReadBytesExt;

/// Largest payload of a single data sub-block
pub const MAX_BLOCK_LEN: usize = 0xFF;

/// Sequential reader over a GIF byte stream.
///
/// Besides plain little endian fields it understands the length prefixed
/// sub-block framing used by image data and extensions. Image data can be
/// consumed byte-wise across sub-block boundaries with [`data_byte`].
///
/// [`data_byte`]: BlockReader::data_byte
pub struct BlockReader<R> {
    r: R,
    block: [u8; MAX_BLOCK_LEN],
    len: usize,
    pos: usize,
    terminated: bool,
    offset: u64,
}

impl<R: Read> BlockReader<R> {
    pub fn new(r: R) -> BlockReader<R> {
        BlockReader {
            r,
            block: [0; MAX_BLOCK_LEN],
            len: 0,
            pos: 0,
            terminated: true,
            offset: 0,
        }
    }

    /// Number of bytes consumed from the underlying reader
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        let b: u8 = self.r.read_le()?;
        self.offset += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> io::Result<u16> {
        let n: u16 = self.r.read_le()?;
        self.offset += 2;
        Ok(n)
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.r.read_exact(buf)?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    /// Reads the next length prefixed sub-block.
    ///
    /// An empty slice is the block terminator. A block that ends before its
    /// declared length yields an `UnexpectedEof` error.
    pub fn read_block(&mut self) -> io::Result<&[u8]> {
        let len = self.read_u8()? as usize;
        self.r.read_exact(&mut self.block[..len])?;
        self.offset += len as u64;
        self.len = len;
        self.pos = len;
        Ok(&self.block[..len])
    }

    /// Skips sub-blocks up to and including the terminator.
    pub fn skip_blocks(&mut self) -> io::Result<()> {
        while !self.read_block()?.is_empty() {}
        Ok(())
    }

    /// Prepares for byte-wise reading of a sub-block sequence.
    pub fn begin_data(&mut self) {
        self.len = 0;
        self.pos = 0;
        self.terminated = false;
    }

    /// Next data byte of the current sub-block sequence, `None` once the
    /// terminator has been read.
    pub fn data_byte(&mut self) -> io::Result<Option<u8>> {
        if self.pos == self.len {
            if self.terminated {
                return Ok(None);
            }
            if self.read_block()?.is_empty() {
                self.terminated = true;
                return Ok(None);
            }
            self.pos = 0;
        }
        let b = self.block[self.pos];
        self.pos += 1;
        Ok(Some(b))
    }

    /// Discards whatever is left of the current sub-block sequence.
    pub fn finish_data(&mut self) -> io::Result<()> {
        if !self.terminated {
            self.skip_blocks()?;
            self.terminated = true;
        }
        self.len = 0;
        self.pos = 0;
        Ok(())
    }
}

/// Pulls variable width LZW codes, least significant bit first, out of a
/// sub-block sequence.
pub struct CodeReader<'a, R> {
    blocks: &'a mut BlockReader<R>,
    acc: u32,
    bits: u8,
}

impl<'a, R: Read> CodeReader<'a, R> {
    pub fn new(blocks: &'a mut BlockReader<R>) -> CodeReader<'a, R> {
        blocks.begin_data();
        CodeReader { blocks, acc: 0, bits: 0 }
    }

    /// Reads one code of `size` bits (at most 12).
    ///
    /// Returns `None` when the data runs out before a full code is available.
    pub fn read_code(&mut self, size: u8) -> io::Result<Option<u16>> {
        debug_assert!(size <= 12);
        while self.bits < size {
            match self.blocks.data_byte()? {
                Some(b) => {
                    self.acc |= (b as u32) << self.bits;
                    self.bits += 8;
                }
                None => return Ok(None),
            }
        }
        let code = (self.acc & ((1 << size) - 1)) as u16;
        self.acc >>= size;
        self.bits -= size;
        Ok(Some(code))
    }

    /// Skips the rest of the image data.
    pub fn finish(self) -> io::Result<()> {
        self.blocks.finish_data()
    }
}
