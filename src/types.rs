//! Common types used both by decoder and encoder
use std::borrow::Cow;

use color_quant::NeuQuant;

/// Images get converted to RGBA
pub const N_CHANNELS: usize = 4;
/// GIF palettes are RGB
pub const PLTE_CHANNELS: usize = 3;

/// Disposal method
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DisposalMethod {
    /// Decoder is not required to take any action.
    #[default]
    Any = 0,
    /// Do not dispose.
    Keep = 1,
    /// Restore to background color.
    Background = 2,
    /// Restore to previous.
    Previous = 3,
}

impl DisposalMethod {
    pub fn from_u8(n: u8) -> Option<DisposalMethod> {
        match n {
            0 => Some(DisposalMethod::Any),
            1 => Some(DisposalMethod::Keep),
            2 => Some(DisposalMethod::Background),
            3 => Some(DisposalMethod::Previous),
            _ => None,
        }
    }

    /// Extracts the disposal method from the packed graphic control flags.
    ///
    /// The reserved values 4-7 are treated like `Keep`.
    pub fn from_flags(flags: u8) -> DisposalMethod {
        DisposalMethod::from_u8((flags & 0b1_1100) >> 2).unwrap_or(DisposalMethod::Keep)
    }
}

enum_from_primitive! {
/// Known block types
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Block {
    Image = 0x2C,
    Extension = 0x21,
    Trailer = 0x3B
}
}

enum_from_primitive! {
/// Known GIF extensions
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Extension {
    Text = 0x01,
    Control = 0xF9,
    Comment = 0xFE,
    Application = 0xFF
}
}

/// Version tag found in the six byte header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Version {
    V87a,
    V89a,
    /// `GIF` followed by something else. Accepted unless decoding strictly.
    Unknown([u8; 3]),
}

impl Version {
    pub(crate) fn from_tag(tag: [u8; 3]) -> Version {
        match &tag {
            b"87a" => Version::V87a,
            b"89a" => Version::V89a,
            _ => Version::Unknown(tag),
        }
    }
}

/// Position and size of a sub-image on the logical screen.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: u16,
    pub top: u16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub fn new(left: u16, top: u16, width: u16, height: u16) -> Rect {
        Rect { left, top, width, height }
    }

    /// Number of pixels covered by the rectangle.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// One decoded animation frame.
///
/// The buffer always covers the whole logical screen (`width * height` RGBA
/// pixels) with disposal of the previous frame already applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Canvas width
    pub width: u16,
    /// Canvas height
    pub height: u16,
    /// Display time in milliseconds
    pub delay: u32,
    /// What to do with the canvas before the next frame is drawn
    pub dispose: DisposalMethod,
    /// The area of the canvas this frame painted
    pub rect: Rect,
    pub transparent: Option<u8>,
    pub interlaced: bool,
    /// Composed RGBA pixels
    pub buffer: Vec<u8>,
    /// Raw palette indices of the sub-image, kept with `ColorOutput::Indexed`
    pub indices: Option<Vec<u8>>,
    /// The color table that was active for this frame, kept with `ColorOutput::Indexed`
    pub palette: Option<Vec<u8>>,
}

impl Frame {
    /// Number of pixels of the canvas
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// RGBA value at `(x, y)`, if inside the canvas
    pub fn pixel(&self, x: u16, y: u16) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * N_CHANNELS;
        let px = self.buffer.get(offset..offset + N_CHANNELS)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// An indexed frame ready to be written by the [`Encoder`](crate::Encoder).
#[derive(Debug, Clone)]
pub struct IndexedFrame<'a> {
    /// Delay in units of 10 ms
    pub delay: u16,
    pub dispose: DisposalMethod,
    pub transparent: Option<u8>,
    pub needs_user_input: bool,
    pub top: u16,
    pub left: u16,
    pub width: u16,
    pub height: u16,
    /// Write rows in interlaced order
    pub interlaced: bool,
    pub palette: Option<Vec<u8>>,
    /// Palette indices, in plain row order
    pub buffer: Cow<'a, [u8]>,
}

impl<'a> Default for IndexedFrame<'a> {
    fn default() -> IndexedFrame<'a> {
        IndexedFrame {
            delay: 0,
            dispose: DisposalMethod::Keep,
            transparent: None,
            needs_user_input: false,
            top: 0,
            left: 0,
            width: 0,
            height: 0,
            interlaced: false,
            palette: None,
            buffer: Cow::Borrowed(&[]),
        }
    }
}

impl<'a> IndexedFrame<'a> {
    /// Creates a full-size frame from palette indices.
    pub fn from_indices(width: u16, height: u16, indices: &'a [u8]) -> IndexedFrame<'a> {
        assert_eq!(width as usize * height as usize, indices.len());
        IndexedFrame {
            width,
            height,
            buffer: Cow::Borrowed(indices),
            ..IndexedFrame::default()
        }
    }
}

impl IndexedFrame<'static> {
    /// Creates a frame from pixels in RGBA format.
    ///
    /// Fully transparent pixels map to a transparent index.
    /// Note: This method is not optimized for speed.
    pub fn from_rgba(width: u16, height: u16, pixels: &mut [u8]) -> IndexedFrame<'static> {
        assert_eq!(width as usize * height as usize * N_CHANNELS, pixels.len());
        let mut transparent = None;
        for pix in pixels.chunks_mut(N_CHANNELS) {
            if pix[3] != 0 {
                pix[3] = 0xFF;
            } else {
                transparent = Some([pix[0], pix[1], pix[2], pix[3]])
            }
        }
        let nq = NeuQuant::new(1, 256, pixels);
        IndexedFrame {
            width,
            height,
            buffer: Cow::Owned(
                pixels
                    .chunks(N_CHANNELS)
                    .map(|pix| nq.index_of(pix) as u8)
                    .collect(),
            ),
            palette: Some(nq.color_map_rgb()),
            transparent: transparent.map(|t| nq.index_of(&t) as u8),
            ..IndexedFrame::default()
        }
    }

    /// Creates a frame from pixels in RGB format.
    ///
    /// Note: This method is not optimized for speed.
    pub fn from_rgb(width: u16, height: u16, pixels: &[u8]) -> IndexedFrame<'static> {
        assert_eq!(width as usize * height as usize * PLTE_CHANNELS, pixels.len());
        let mut vec: Vec<u8> = Vec::with_capacity(width as usize * height as usize * N_CHANNELS);
        for v in pixels.chunks(PLTE_CHANNELS) {
            vec.extend_from_slice(&[v[0], v[1], v[2], 0xFF])
        }
        IndexedFrame::from_rgba(width, height, &mut vec)
    }
}

#[cfg(test)]
mod test {
    use enum_primitive::FromPrimitive;

    use super::*;

    #[test]
    fn disposal_from_flags() {
        assert_eq!(DisposalMethod::from_flags(0b0000_0000), DisposalMethod::Any);
        assert_eq!(DisposalMethod::from_flags(0b0000_0100), DisposalMethod::Keep);
        assert_eq!(DisposalMethod::from_flags(0b0000_1001), DisposalMethod::Background);
        assert_eq!(DisposalMethod::from_flags(0b0000_1100), DisposalMethod::Previous);
        // reserved
        assert_eq!(DisposalMethod::from_flags(0b0001_1100), DisposalMethod::Keep);
    }

    #[test]
    fn block_codes() {
        assert_eq!(Block::from_u8(0x2C), Some(Block::Image));
        assert_eq!(Block::from_u8(0x3B), Some(Block::Trailer));
        assert_eq!(Block::from_u8(0x00), None);
        assert_eq!(Extension::from_u8(0xF9), Some(Extension::Control));
    }

    #[test]
    fn quantized_rgb_frame() {
        let mut pixels = Vec::new();
        for i in 0..16 * 16 {
            pixels.extend_from_slice(if i % 2 == 0 { &[255, 0, 0] } else { &[0, 0, 255] });
        }
        let frame = IndexedFrame::from_rgb(16, 16, &pixels);
        assert_eq!(frame.buffer.len(), 256);
        assert_eq!(frame.buffer[0], frame.buffer[2]);
        assert_ne!(frame.buffer[0], frame.buffer[1]);
        assert!(frame.transparent.is_none());
        assert_eq!(frame.palette.as_ref().map(|p| p.len()), Some(256 * 3));
    }

    #[test]
    fn frame_pixel_lookup() {
        let frame = Frame {
            width: 2,
            height: 1,
            delay: 0,
            dispose: DisposalMethod::Any,
            rect: Rect::new(0, 0, 2, 1),
            transparent: None,
            interlaced: false,
            buffer: vec![1, 2, 3, 4, 5, 6, 7, 8],
            indices: None,
            palette: None,
        };
        assert_eq!(frame.pixel(1, 0), Some([5, 6, 7, 8]));
        assert_eq!(frame.pixel(2, 0), None);
        assert_eq!(frame.pixel_count(), 2);
    }
}
