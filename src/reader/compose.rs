//! Composition of decoded sub-images onto the logical screen.
use std::collections::TryReserveError;

use crate::types::{DisposalMethod, Rect, N_CHANNELS, PLTE_CHANNELS};

/// Fully transparent black, the color of an empty canvas
const CLEAR: [u8; 4] = [0; 4];

/// Maps source rows of an interlaced image to their destination rows.
///
/// Rows are stored in four passes: every 8th row starting at 0, every 8th
/// starting at 4, every 4th starting at 2 and every 2nd starting at 1.
#[derive(Debug, Clone)]
pub struct InterlaceRows {
    height: usize,
    pass: usize,
    row: usize,
}

const PASSES: [(usize, usize); 4] = [(0, 8), (4, 8), (2, 4), (1, 2)];

impl InterlaceRows {
    pub fn new(height: usize) -> InterlaceRows {
        InterlaceRows { height, pass: 0, row: 0 }
    }
}

impl Iterator for InterlaceRows {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.pass < PASSES.len() {
            if self.row < self.height {
                let row = self.row;
                self.row += PASSES[self.pass].1;
                return Some(row);
            }
            self.pass += 1;
            if let Some(&(start, _)) = PASSES.get(self.pass) {
                self.row = start;
            }
        }
        None
    }
}

/// The previous frame, as far as composing the next one is concerned.
#[derive(Debug, Clone, Copy)]
pub struct Prior<'a> {
    /// Canvas after the previous frame was drawn
    pub canvas: &'a [u8],
    /// Disposal requested by the previous frame
    pub dispose: DisposalMethod,
    /// Area painted by the previous frame
    pub rect: Rect,
    /// Whether the previous frame used a transparent index
    pub transparent: bool,
    /// Canvas from two frames back, used by `DisposalMethod::Previous`
    pub before: Option<&'a [u8]>,
}

/// A decoded sub-image ready to be painted.
#[derive(Debug, Clone, Copy)]
pub struct SubImage<'a> {
    /// Active color table, RGB triples
    pub palette: &'a [u8],
    /// Palette indices in stream row order
    pub indices: &'a [u8],
    pub rect: Rect,
    pub interlaced: bool,
    pub transparent: Option<u8>,
}

/// Builds full-canvas RGBA frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameAssembler {
    width: usize,
    height: usize,
    background: [u8; 4],
}

impl FrameAssembler {
    /// `background` is the RGBA value used by `DisposalMethod::Background`.
    pub fn new(width: u16, height: u16, background: [u8; 4]) -> FrameAssembler {
        FrameAssembler {
            width: width as usize,
            height: height as usize,
            background,
        }
    }

    /// Byte length of a canvas buffer
    pub fn canvas_len(&self) -> usize {
        self.width * self.height * N_CHANNELS
    }

    /// Composes `image` over whatever the previous frame's disposal leaves
    /// behind and returns the new canvas.
    ///
    /// Fails only if the canvas cannot be allocated.
    pub fn compose(
        &self,
        image: &SubImage<'_>,
        prior: Option<&Prior<'_>>,
    ) -> Result<Vec<u8>, TryReserveError> {
        let mut canvas = self.base(prior)?;
        self.paint(&mut canvas, image);
        Ok(canvas)
    }

    fn base(&self, prior: Option<&Prior<'_>>) -> Result<Vec<u8>, TryReserveError> {
        let prior = match prior {
            Some(prior) => prior,
            None => return self.copy_canvas(&[]),
        };
        match prior.dispose {
            DisposalMethod::Any | DisposalMethod::Keep => self.copy_canvas(prior.canvas),
            DisposalMethod::Background => {
                let mut canvas = self.copy_canvas(prior.canvas)?;
                let fill = if prior.transparent { CLEAR } else { self.background };
                self.fill_rect(&mut canvas, prior.rect, fill);
                Ok(canvas)
            }
            DisposalMethod::Previous => self.copy_canvas(prior.before.unwrap_or(&[])),
        }
    }

    /// A canvas-sized copy of `canvas`, zero-padded
    fn copy_canvas(&self, canvas: &[u8]) -> Result<Vec<u8>, TryReserveError> {
        let len = self.canvas_len();
        let mut copy = Vec::new();
        copy.try_reserve_exact(len)?;
        copy.extend_from_slice(&canvas[..canvas.len().min(len)]);
        copy.resize(len, 0);
        Ok(copy)
    }

    fn fill_rect(&self, canvas: &mut [u8], rect: Rect, color: [u8; 4]) {
        let left = (rect.left as usize).min(self.width);
        let right = (rect.left as usize + rect.width as usize).min(self.width);
        let bottom = (rect.top as usize + rect.height as usize).min(self.height);
        for y in (rect.top as usize).min(self.height)..bottom {
            let row = y * self.width;
            for x in left..right {
                let offset = (row + x) * N_CHANNELS;
                canvas[offset..offset + N_CHANNELS].copy_from_slice(&color);
            }
        }
    }

    fn paint(&self, canvas: &mut [u8], image: &SubImage<'_>) {
        let width = image.rect.width as usize;
        let height = image.rect.height as usize;
        if width == 0 || height == 0 {
            return;
        }
        let mut interlaced = InterlaceRows::new(height);
        for (i, src) in image.indices.chunks(width).take(height).enumerate() {
            let line = if image.interlaced {
                match interlaced.next() {
                    Some(line) => line,
                    None => break,
                }
            } else {
                i
            };
            let y = line + image.rect.top as usize;
            if y >= self.height {
                continue;
            }
            let row = y * self.width;
            for (dx, &index) in src.iter().enumerate() {
                let x = image.rect.left as usize + dx;
                if x >= self.width {
                    break;
                }
                if image.transparent == Some(index) {
                    continue;
                }
                let plte = index as usize * PLTE_CHANNELS;
                if let Some(rgb) = image.palette.get(plte..plte + PLTE_CHANNELS) {
                    let offset = (row + x) * N_CHANNELS;
                    canvas[offset..offset + PLTE_CHANNELS].copy_from_slice(rgb);
                    canvas[offset + N_CHANNELS - 1] = 0xFF;
                }
            }
        }
    }
}
