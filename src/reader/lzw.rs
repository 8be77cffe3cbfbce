//! LZW decompression of GIF image data.
use std::io::{self, Read};

use log::trace;
use thiserror::Error;

use super::bits::{BlockReader, CodeReader};

/// Maximum number of entries of the code table
pub const MAX_CODES: usize = 4096;
/// Codes never grow wider than this
const MAX_CODE_SIZE: u8 = 12;

#[derive(Debug, Error)]
pub enum LzwError {
    /// A sub-block ended before its declared length.
    #[error("image data ends inside a sub-block")]
    Truncated,
    #[error("invalid LZW code {0}")]
    InvalidCode(u16),
    #[error("invalid LZW minimum code size {0}")]
    CodeSize(u8),
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for LzwError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => LzwError::Truncated,
            _ => LzwError::Io(err),
        }
    }
}

/// How the code stream of one image ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum End {
    /// End-of-information code
    Eoi,
    /// All pixels of the image were produced before an end code
    Full,
    /// The sub-blocks ran out first
    Exhausted,
}

/// Result of decoding one image
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Number of pixels produced; the rest of the output stays zero
    pub pixels: usize,
    pub end: End,
}

/// Reusable LZW decoder.
///
/// The working tables are kept between images to avoid reallocating them for
/// every frame of an animation.
pub struct LzwDecoder {
    prefix: Vec<u16>,
    suffix: Vec<u8>,
    stack: Vec<u8>,
}

impl Default for LzwDecoder {
    fn default() -> LzwDecoder {
        LzwDecoder::new()
    }
}

impl LzwDecoder {
    pub fn new() -> LzwDecoder {
        LzwDecoder {
            prefix: vec![0; MAX_CODES],
            suffix: vec![0; MAX_CODES],
            stack: Vec::with_capacity(MAX_CODES + 1),
        }
    }

    /// Decodes the sub-block sequence at the reader position into `out`.
    ///
    /// `out` must be zeroed and sized to the image area. Decoding stops at the
    /// end code, once `out` is full, or when the data runs out; pixels that
    /// were not produced stay zero. On success the remaining sub-blocks
    /// including the terminator are consumed. After an `InvalidCode` error the
    /// reader still sits inside the image data and the caller decides whether
    /// to skip it.
    pub fn decode<R: Read>(
        &mut self,
        min_code_size: u8,
        blocks: &mut BlockReader<R>,
        out: &mut [u8],
    ) -> Result<Decoded, LzwError> {
        if min_code_size == 0 || min_code_size >= MAX_CODE_SIZE {
            return Err(LzwError::CodeSize(min_code_size));
        }
        let clear = 1u16 << min_code_size;
        let eoi = clear + 1;
        for code in 0..clear {
            self.prefix[code as usize] = 0;
            self.suffix[code as usize] = code as u8;
        }

        let mut codes = CodeReader::new(blocks);
        let mut code_size = min_code_size + 1;
        let mut next = clear + 2;
        let mut prev: Option<u16> = None;
        let mut first = 0u8;
        let mut written = 0;

        let end = loop {
            if written == out.len() {
                break End::Full;
            }
            let code = match codes.read_code(code_size)? {
                Some(code) => code,
                None => break End::Exhausted,
            };
            if code == clear {
                code_size = min_code_size + 1;
                next = clear + 2;
                prev = None;
                continue;
            }
            if code == eoi {
                break End::Eoi;
            }
            let old = match prev {
                None => {
                    if code > clear {
                        return Err(LzwError::InvalidCode(code));
                    }
                    first = self.suffix[code as usize];
                    out[written] = first;
                    written += 1;
                    prev = Some(code);
                    continue;
                }
                Some(old) => old,
            };
            if code > next {
                return Err(LzwError::InvalidCode(code));
            }

            self.stack.clear();
            let mut c = code;
            if code == next {
                // KwKwK: the string is not in the table yet
                self.stack.push(first);
                c = old;
            }
            while c > clear {
                self.stack.push(self.suffix[c as usize]);
                c = self.prefix[c as usize];
            }
            first = self.suffix[c as usize];
            self.stack.push(first);

            if (next as usize) < MAX_CODES {
                self.prefix[next as usize] = old;
                self.suffix[next as usize] = first;
                next += 1;
                if next == 1 << code_size && code_size < MAX_CODE_SIZE {
                    code_size += 1;
                }
            }
            // A full table without a clear code keeps decoding with the
            // current entries.
            prev = Some(code);

            for &px in self.stack.iter().rev() {
                if written == out.len() {
                    break;
                }
                out[written] = px;
                written += 1;
            }
        };

        if end == End::Exhausted {
            trace!("image data exhausted after {} of {} pixels", written, out.len());
        }
        codes.finish()?;
        Ok(Decoded { pixels: written, end })
    }
}

#[cfg(test)]
mod test {
    use super::{End, LzwDecoder, LzwError, MAX_CODES};
    use crate::reader::bits::BlockReader;

    /// Packs codes LSB first and frames them as sub-blocks.
    struct CodeWriter {
        bytes: Vec<u8>,
        acc: u32,
        bits: u8,
    }

    impl CodeWriter {
        fn new() -> CodeWriter {
            CodeWriter { bytes: Vec::new(), acc: 0, bits: 0 }
        }

        fn put(&mut self, code: u16, size: u8) {
            self.acc |= (code as u32) << self.bits;
            self.bits += size;
            while self.bits >= 8 {
                self.bytes.push(self.acc as u8);
                self.acc >>= 8;
                self.bits -= 8;
            }
        }

        fn into_blocks(mut self) -> Vec<u8> {
            if self.bits > 0 {
                self.bytes.push(self.acc as u8);
            }
            let mut out = Vec::new();
            for chunk in self.bytes.chunks(255) {
                out.push(chunk.len() as u8);
                out.extend_from_slice(chunk);
            }
            out.push(0);
            out
        }
    }

    fn run(min: u8, data: &[u8], len: usize) -> (Result<super::Decoded, LzwError>, Vec<u8>) {
        let mut out = vec![0; len];
        let mut r = BlockReader::new(data);
        let res = LzwDecoder::new().decode(min, &mut r, &mut out);
        (res, out)
    }

    fn lzw_encode(min: u8, data: &[u8]) -> Vec<u8> {
        let mut raw = Vec::new();
        {
            let mut enc = lzw::Encoder::new(lzw::LsbWriter::new(&mut raw), min).unwrap();
            enc.encode_bytes(data).unwrap();
        }
        let mut out = Vec::new();
        for chunk in raw.chunks(255) {
            out.push(chunk.len() as u8);
            out.extend_from_slice(chunk);
        }
        out.push(0);
        out
    }

    #[test]
    fn single_pixel() {
        let (res, out) = run(2, &[2, 0x44, 0x01, 0], 1);
        let decoded = res.unwrap();
        assert_eq!(decoded.pixels, 1);
        assert_eq!(out, [0]);
    }

    #[test]
    fn kwkwk_sequence() {
        // clear, 1, 6 (= "1 1"), eoi with min code size 2
        let mut w = CodeWriter::new();
        w.put(4, 3);
        w.put(1, 3);
        w.put(6, 3);
        w.put(5, 3);
        let (res, out) = run(2, &w.into_blocks(), 4);
        let decoded = res.unwrap();
        assert_eq!(decoded.end, End::Eoi);
        assert_eq!(decoded.pixels, 3);
        assert_eq!(out, [1, 1, 1, 0]);
    }

    #[test]
    fn matches_reference_encoder() {
        let data: Vec<u8> = (0..4000u32).map(|i| ((i * 7 + i / 13) % 16) as u8).collect();
        let blocks = lzw_encode(4, &data);
        let (res, out) = run(4, &blocks, data.len());
        let decoded = res.unwrap();
        assert_eq!(decoded.pixels, data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn shortfall_is_zero_filled() {
        let data = [3u8; 10];
        let blocks = lzw_encode(2, &data);
        let (res, out) = run(2, &blocks, 16);
        let decoded = res.unwrap();
        assert_eq!(decoded.pixels, 10);
        assert_eq!(decoded.end, End::Eoi);
        assert_eq!(&out[..10], &data);
        assert!(out[10..].iter().all(|&px| px == 0));
    }

    #[test]
    fn exhausted_without_end_code() {
        // 6 bits of codes, the 2 padding bits cannot hold another code
        let mut w = CodeWriter::new();
        w.put(4, 3);
        w.put(2, 3);
        let (res, out) = run(2, &w.into_blocks(), 4);
        let decoded = res.unwrap();
        assert_eq!(decoded.end, End::Exhausted);
        assert_eq!(decoded.pixels, 1);
        assert_eq!(out, [2, 0, 0, 0]);
    }

    #[test]
    fn out_of_range_code() {
        let mut w = CodeWriter::new();
        w.put(4, 3);
        w.put(0, 3);
        w.put(7, 3);
        let (res, out) = run(2, &w.into_blocks(), 4);
        match res {
            Err(LzwError::InvalidCode(7)) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(out, [0, 0, 0, 0]);
    }

    #[test]
    fn truncated_sub_block() {
        let (res, _) = run(2, &[5, 0x44], 4);
        assert!(matches!(res, Err(LzwError::Truncated)));
    }

    #[test]
    fn rejects_bad_code_size() {
        assert!(matches!(run(0, &[0], 1).0, Err(LzwError::CodeSize(0))));
        assert!(matches!(run(12, &[0], 1).0, Err(LzwError::CodeSize(12))));
    }

    #[test]
    fn full_table_without_clear() {
        // Literal codes only; the table fills up and is never cleared.
        let count = 6000;
        let mut w = CodeWriter::new();
        let mut size = 3;
        let mut next = 6usize;
        w.put(4, size);
        for i in 0..count {
            w.put(1, size);
            if i > 0 && next < MAX_CODES {
                next += 1;
                if next == 1 << size && size < 12 {
                    size += 1;
                }
            }
        }
        w.put(5, size);
        let (res, out) = run(2, &w.into_blocks(), count);
        let decoded = res.unwrap();
        assert_eq!(decoded.pixels, count);
        assert!(out.iter().all(|&px| px == 1));
    }
}
