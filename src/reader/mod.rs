use std::io;
use std::io::prelude::*;

use crate::traits::{HasParameters, Parameter};
use crate::types::Frame;

mod bits;
mod compose;
mod decoder;
mod lzw;

pub use self::compose::InterlaceRows;
pub use self::decoder::{
    ColorOutput, DecodingError, GifDecoder, MemoryLimit, ParseEvent, Status, Strictness,
};
pub use self::lzw::LzwError;

impl<T, R> Parameter<Reader<R>> for T
where
    T: Parameter<GifDecoder>,
    R: Read,
{
    fn set_param(self, this: &mut Reader<R>) {
        this.decoder.set(self);
    }
}

/// Buffered GIF reader.
///
/// Wraps a byte source and decodes it on the first call to
/// [`read_to_end`](Reader::read_to_end).
pub struct Reader<R: Read> {
    r: Option<io::BufReader<R>>,
    decoder: GifDecoder,
}

impl<R: Read> HasParameters for Reader<R> {}

impl<R> Reader<R>
where
    R: Read,
{
    pub fn new(reader: R) -> Reader<R> {
        Reader {
            r: Some(io::BufReader::new(reader)),
            decoder: GifDecoder::new(),
        }
    }

    /// Decodes the whole stream and returns its frames.
    ///
    /// On failure the frames decoded before the error can still be reached
    /// through [`decoder`](Reader::decoder).
    pub fn read_to_end(&mut self) -> Result<&[Frame], DecodingError> {
        if let Some(r) = self.r.take() {
            self.decoder.decode(r);
        }
        match self.decoder.status() {
            Status::Finished => Ok(self.decoder.frames()),
            _ => Err(self
                .decoder
                .take_error()
                .unwrap_or(DecodingError::Format("stream was already rejected"))),
        }
    }

    /// Width of the image
    pub fn width(&self) -> u16 {
        self.decoder.width()
    }

    /// Height of the image
    pub fn height(&self) -> u16 {
        self.decoder.height()
    }

    /// The global color palette
    pub fn global_palette(&self) -> &[u8] {
        self.decoder.global_palette()
    }

    /// Index of the background color in the global palette
    pub fn bg_color(&self) -> usize {
        self.decoder.background_index() as usize
    }

    pub fn decoder(&self) -> &GifDecoder {
        &self.decoder
    }

    /// Decodes the stream if that has not happened yet and hands out the
    /// resulting animation.
    pub fn into_animation(mut self) -> Animation {
        if let Some(r) = self.r.take() {
            self.decoder.decode(r);
        }
        Animation::from_decoder(&mut self.decoder)
    }
}

/// Decodes a GIF held in memory.
pub fn decode(data: &[u8]) -> Animation {
    decode_from(data)
}

/// Decodes a GIF read from `r`.
pub fn decode_from<R: Read>(r: R) -> Animation {
    Reader::new(r).into_animation()
}

/// A decoded frame sequence with a playback cursor.
///
/// Decoding never panics or returns an error here; check [`status`] to see
/// whether the stream was complete.
///
/// [`status`]: Animation::status
#[derive(Debug, Clone)]
pub struct Animation {
    frames: Vec<Frame>,
    width: u16,
    height: u16,
    loop_count: u16,
    status: Status,
    cursor: Option<usize>,
}

impl Animation {
    pub(crate) fn from_decoder(decoder: &mut GifDecoder) -> Animation {
        Animation {
            width: decoder.width(),
            height: decoder.height(),
            loop_count: decoder.loop_count(),
            status: decoder.status(),
            frames: decoder.take_frames(),
            cursor: None,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Number of iterations, 0 means forever
    pub fn loop_count(&self) -> u16 {
        self.loop_count
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame(&self, n: usize) -> Option<&Frame> {
        self.frames.get(n)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Display time of every frame in milliseconds
    pub fn delays(&self) -> Vec<u32> {
        self.frames.iter().map(|f| f.delay).collect()
    }

    /// Length of one iteration in milliseconds
    pub fn total_duration(&self) -> u64 {
        self.frames.iter().map(|f| f.delay as u64).sum()
    }

    /// Index following `n`, `None` after the last frame
    pub fn next_index(&self, n: usize) -> Option<usize> {
        if n + 1 < self.frames.len() {
            Some(n + 1)
        } else {
            None
        }
    }

    /// Advances the cursor and returns the frame under it.
    ///
    /// The first call yields the first frame, the cursor wraps around after
    /// the last one.
    pub fn next_frame(&mut self) -> Option<&Frame> {
        if self.frames.is_empty() {
            return None;
        }
        let next = match self.cursor {
            Some(n) => self.next_index(n).unwrap_or(0),
            None => 0,
        };
        self.cursor = Some(next);
        self.frames.get(next)
    }

    /// The frame last returned by [`next_frame`](Animation::next_frame)
    pub fn current(&self) -> Option<&Frame> {
        self.cursor.and_then(|n| self.frames.get(n))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.cursor
    }

    pub fn rewind(&mut self) {
        self.cursor = None;
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}
