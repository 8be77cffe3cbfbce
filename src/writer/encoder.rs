use std::io;
use std::io::prelude::*;

use crate::reader::InterlaceRows;
use crate::traits::WriteBytesExt;
use crate::types::{Block, DisposalMethod, Extension, IndexedFrame, PLTE_CHANNELS};

/// Extension blocks the encoder knows how to write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionData {
    Control { flags: u8, delay: u16, trns: u8 },
    /// NETSCAPE2.0 looping, 0 repeats forever
    Repetitions(u16),
}

impl ExtensionData {
    pub fn new_control_ext(
        delay: u16,
        dispose: DisposalMethod,
        needs_user_input: bool,
        trns: Option<u8>,
    ) -> ExtensionData {
        let mut flags = 0;
        let trns = match trns {
            Some(trns) => {
                flags |= 1;
                trns
            }
            None => 0,
        };
        flags |= (needs_user_input as u8) << 1;
        flags |= (dispose as u8) << 2;
        ExtensionData::Control { flags, delay, trns }
    }
}

/// Adapter that cuts a byte stream into data sub-blocks.
struct BlockWriter<'a, W: Write + 'a> {
    w: &'a mut W,
    buf: [u8; 0xFF],
    len: usize,
}

impl<'a, W: Write + 'a> BlockWriter<'a, W> {
    fn new(w: &'a mut W) -> BlockWriter<'a, W> {
        BlockWriter { w, buf: [0; 0xFF], len: 0 }
    }

    /// Writes the pending partial block followed by the terminator.
    fn finish(mut self) -> io::Result<()> {
        self.flush_block()?;
        self.w.write_le(0u8)
    }

    fn flush_block(&mut self) -> io::Result<()> {
        if self.len > 0 {
            self.w.write_le(self.len as u8)?;
            self.w.write_all(&self.buf[..self.len])?;
            self.len = 0;
        }
        Ok(())
    }
}

impl<'a, W: Write + 'a> Write for BlockWriter<'a, W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = (self.buf.len() - self.len).min(data.len());
        self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
        self.len += n;
        if self.len == self.buf.len() {
            self.flush_block()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// GIF89a encoder.
///
/// The logical screen descriptor is written lazily before the first block,
/// the trailer when the encoder is dropped.
pub struct Encoder<'a, W: Write + 'a> {
    w: &'a mut W,
    header_written: bool,
    global_palette: bool,
    width: u16,
    height: u16,
}

impl<'a, W: Write + 'a> Encoder<'a, W> {
    pub fn new(w: &'a mut W, width: u16, height: u16) -> Self {
        Encoder {
            w,
            header_written: false,
            global_palette: false,
            width,
            height,
        }
    }

    /// Writes the screen descriptor together with a global color table.
    ///
    /// Must be called before anything else is written.
    pub fn write_global_palette(&mut self, palette: &[u8]) -> io::Result<()> {
        if self.header_written {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "the global palette must precede all other blocks",
            ));
        }
        let num_colors = palette.len() / PLTE_CHANNELS;
        if num_colors == 0 || num_colors > 256 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "a color table holds between 1 and 256 colors",
            ));
        }
        self.write_header(0b1000_0000 | flag_size(num_colors))?;
        self.write_color_table(palette)?;
        self.global_palette = true;
        Ok(())
    }

    /// Sets how often the animation repeats, 0 meaning forever.
    pub fn write_loop_count(&mut self, count: u16) -> io::Result<()> {
        self.write_extension(ExtensionData::Repetitions(count))
    }

    /// Writes a complete frame to the image
    ///
    /// Note: This function also writes a control extension if necessary.
    pub fn write_frame(&mut self, frame: &IndexedFrame<'_>) -> io::Result<()> {
        if frame.buffer.len() != frame.width as usize * frame.height as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "frame buffer does not match its dimensions",
            ));
        }
        self.write_screen_desc()?;
        if frame.delay > 0
            || frame.transparent.is_some()
            || frame.needs_user_input
            || frame.dispose != DisposalMethod::Keep
        {
            self.write_extension(ExtensionData::new_control_ext(
                frame.delay,
                frame.dispose,
                frame.needs_user_input,
                frame.transparent,
            ))?;
        }
        self.w.write_le(Block::Image as u8)?;
        self.w.write_le(frame.left)?;
        self.w.write_le(frame.top)?;
        self.w.write_le(frame.width)?;
        self.w.write_le(frame.height)?;
        let mut flags = 0;
        if frame.interlaced {
            flags |= 0b0100_0000;
        }
        match frame.palette {
            Some(ref palette) => {
                let num_colors = palette.len() / PLTE_CHANNELS;
                if num_colors == 0 || num_colors > 256 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "a color table holds between 1 and 256 colors",
                    ));
                }
                flags |= 0b1000_0000;
                flags |= flag_size(num_colors);
                self.w.write_le(flags)?;
                self.write_color_table(palette)?;
            }
            None => {
                if !self.global_palette {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "The GIF format requires a color palette but none was given.",
                    ));
                }
                self.w.write_le(flags)?;
            }
        }
        if frame.interlaced {
            let width = frame.width as usize;
            let mut data = Vec::with_capacity(frame.buffer.len());
            if width > 0 {
                for row in InterlaceRows::new(frame.height as usize) {
                    data.extend_from_slice(&frame.buffer[row * width..(row + 1) * width]);
                }
            }
            self.write_image_block(&data)
        } else {
            self.write_image_block(&frame.buffer)
        }
    }

    fn write_image_block(&mut self, data: &[u8]) -> io::Result<()> {
        let max = data.iter().copied().max().unwrap_or(0) as usize;
        let min_code_size = (flag_size(max + 1) + 1).max(2);
        self.w.write_le(min_code_size)?;
        let mut blocks = BlockWriter::new(&mut *self.w);
        {
            let mut enc = lzw::Encoder::new(lzw::LsbWriter::new(&mut blocks), min_code_size)?;
            enc.encode_bytes(data)?;
        }
        blocks.finish()
    }

    fn write_color_table(&mut self, table: &[u8]) -> io::Result<()> {
        let num_colors = table.len() / PLTE_CHANNELS;
        let size = flag_size(num_colors);
        self.w.write_all(&table[..num_colors * PLTE_CHANNELS])?;
        // Pad to a power of two
        for _ in num_colors..(2 << size) {
            self.w.write_all(&[0, 0, 0])?
        }
        Ok(())
    }

    /// Writes an extension to the image
    pub fn write_extension(&mut self, extension: ExtensionData) -> io::Result<()> {
        use self::ExtensionData::*;
        self.write_screen_desc()?;
        self.w.write_le(Block::Extension as u8)?;
        match extension {
            Control { flags, delay, trns } => {
                self.w.write_le(Extension::Control as u8)?;
                self.w.write_le(4u8)?;
                self.w.write_le(flags)?;
                self.w.write_le(delay)?;
                self.w.write_le(trns)?;
            }
            Repetitions(count) => {
                self.w.write_le(Extension::Application as u8)?;
                self.w.write_le(11u8)?;
                self.w.write_all(b"NETSCAPE2.0")?;
                self.w.write_le(3u8)?;
                self.w.write_le(1u8)?;
                self.w.write_le(count)?;
            }
        }
        self.w.write_le(0u8)
    }

    /// Writes an extension with arbitrary payload
    pub fn write_raw_extension(&mut self, func: u8, data: &[u8]) -> io::Result<()> {
        self.write_screen_desc()?;
        self.w.write_le(Block::Extension as u8)?;
        self.w.write_le(func)?;
        for chunk in data.chunks(0xFF) {
            self.w.write_le(chunk.len() as u8)?;
            self.w.write_all(chunk)?;
        }
        self.w.write_le(0u8)
    }

    /// Writes the logical screen descriptor without a global color table
    fn write_screen_desc(&mut self) -> io::Result<()> {
        if !self.header_written {
            self.write_header(0)?;
        }
        Ok(())
    }

    fn write_header(&mut self, flags: u8) -> io::Result<()> {
        self.w.write_all(b"GIF89a")?;
        self.w.write_le(self.width)?;
        self.w.write_le(self.height)?;
        self.w.write_le(flags)?;
        self.w.write_le(0u8)?; // bg index
        self.w.write_le(0u8)?; // aspect ratio
        self.header_written = true;
        Ok(())
    }
}

// Color table size converted to flag bits
fn flag_size(size: usize) -> u8 {
    match size {
        0..=2 => 0,
        3..=4 => 1,
        5..=8 => 2,
        9..=16 => 3,
        17..=32 => 4,
        33..=64 => 5,
        65..=128 => 6,
        _ => 7,
    }
}

impl<'a, W: Write + 'a> Drop for Encoder<'a, W> {
    fn drop(&mut self) {
        if self.header_written {
            let _ = self.w.write_le(Block::Trailer as u8);
        }
    }
}
