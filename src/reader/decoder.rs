use std::fmt;
use std::io::{self, Read};
use std::mem;

use enum_primitive::FromPrimitive;
use log::{debug, trace, warn};
use thiserror::Error;

use crate::traits::{HasParameters, Parameter};
use crate::types::{
    Block, DisposalMethod, Extension, Frame, Rect, Version, N_CHANNELS, PLTE_CHANNELS,
};

use super::bits::BlockReader;
use super::compose::{FrameAssembler, Prior, SubImage};
use super::lzw::{LzwDecoder, LzwError};

#[derive(Debug, Error)]
pub enum DecodingError {
    #[error("format error: {0}")]
    Format(&'static str),
    #[error("cannot open GIF source: {0}")]
    Open(&'static str),
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for DecodingError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => DecodingError::Format("unexpected end of file"),
            _ => DecodingError::Io(err),
        }
    }
}

impl From<LzwError> for DecodingError {
    fn from(err: LzwError) -> Self {
        match err {
            LzwError::Truncated => DecodingError::Format("image data ends inside a sub-block"),
            LzwError::InvalidCode(_) => DecodingError::Format("invalid LZW code"),
            LzwError::CodeSize(_) => DecodingError::Format("invalid LZW minimum code size"),
            LzwError::Io(err) => DecodingError::Io(err),
        }
    }
}

/// Output mode for the image data
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ColorOutput {
    /// Frames carry composed RGBA pixels only
    Rgba,
    /// Frames additionally keep their raw palette indices and color table
    Indexed,
}

impl Parameter<GifDecoder> for ColorOutput {
    fn set_param(self, this: &mut GifDecoder) {
        this.color_output = self
    }
}

/// How corrupt image data is handled
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Strictness {
    /// Keep the zero-filled remains of a corrupt image and continue with the
    /// next block. One stray byte between blocks is ignored.
    Lenient,
    /// Any malformed data ends decoding with a format error.
    Strict,
}

impl Parameter<GifDecoder> for Strictness {
    fn set_param(self, this: &mut GifDecoder) {
        this.strictness = self
    }
}

/// Ceiling on the bytes a decode may hold in frame buffers.
///
/// Covers every retained canvas plus the index buffer of the image being
/// decoded. A stream that needs more ends with a format error before the
/// allocation is attempted.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct MemoryLimit(pub usize);

impl MemoryLimit {
    pub const DEFAULT: MemoryLimit = MemoryLimit(512 * 1024 * 1024);
    pub const NONE: MemoryLimit = MemoryLimit(usize::MAX);
}

impl Default for MemoryLimit {
    fn default() -> MemoryLimit {
        MemoryLimit::DEFAULT
    }
}

impl Parameter<GifDecoder> for MemoryLimit {
    fn set_param(self, this: &mut GifDecoder) {
        this.memory_limit = self
    }
}

/// Decoding status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Nothing decoded yet, or freed
    Idle,
    Parsing,
    /// The trailer was reached
    Finished,
    /// Malformed stream. Frames decoded before the error remain available.
    FormatError,
    /// The source could not be read at all
    OpenError,
}

/// Notification sent to the parse listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseEvent {
    /// A frame was appended to the sequence
    FrameReady { index: usize, first: bool },
    /// Decoding reached the trailer
    Finished { frames: usize },
    /// Decoding stopped with an error status
    Failed(Status),
}

type Listener = Box<dyn FnMut(&ParseEvent) + Send>;

/// Internal state of the GIF decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    ScreenDescriptor,
    Blocks,
    Image,
    GraphicControl,
    Application,
    Skip,
}

/// Graphic control values waiting for the next image
#[derive(Debug, Clone, Copy, Default)]
struct Control {
    /// Milliseconds
    delay: u32,
    dispose: DisposalMethod,
    transparent: Option<u8>,
}

/// Synchronous GIF decoder.
///
/// Reads the whole stream on the calling thread and builds one RGBA
/// [`Frame`] per image block. The outcome is recorded as a [`Status`]
/// instead of being returned as an error, frames decoded before a failure
/// stay available.
pub struct GifDecoder {
    status: Status,
    color_output: ColorOutput,
    strictness: Strictness,
    memory_limit: MemoryLimit,
    /// Bytes held by decoded frames
    retained: usize,
    version: Option<Version>,
    width: u16,
    height: u16,
    global_palette: Vec<u8>,
    background_index: u8,
    pixel_aspect_ratio: u8,
    /// Set once an image drawn with the global table makes the background
    /// index transparent
    clear_background: bool,
    loop_count: u16,
    control: Control,
    stray_bytes: usize,
    frames: Vec<Frame>,
    error: Option<DecodingError>,
    lzw: LzwDecoder,
    listener: Option<Listener>,
}

impl HasParameters for GifDecoder {}

impl Default for GifDecoder {
    fn default() -> GifDecoder {
        GifDecoder::new()
    }
}

impl fmt::Debug for GifDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GifDecoder")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("frames", &self.frames.len())
            .field("loop_count", &self.loop_count)
            .field("error", &self.error)
            .finish()
    }
}

impl GifDecoder {
    pub fn new() -> GifDecoder {
        GifDecoder {
            status: Status::Idle,
            color_output: ColorOutput::Rgba,
            strictness: Strictness::Lenient,
            memory_limit: MemoryLimit::DEFAULT,
            retained: 0,
            version: None,
            width: 0,
            height: 0,
            global_palette: Vec::new(),
            background_index: 0,
            pixel_aspect_ratio: 0,
            clear_background: false,
            loop_count: 1,
            control: Control::default(),
            stray_bytes: 0,
            frames: Vec::new(),
            error: None,
            lzw: LzwDecoder::new(),
            listener: None,
        }
    }

    /// Creates a decoder that reports progress to `listener`.
    pub fn with_listener<F>(listener: F) -> GifDecoder
    where
        F: FnMut(&ParseEvent) + Send + 'static,
    {
        let mut decoder = GifDecoder::new();
        decoder.listener = Some(Box::new(listener));
        decoder
    }

    /// Decodes a complete GIF held in memory.
    pub fn decode_bytes(&mut self, data: &[u8]) -> Status {
        self.decode(data)
    }

    /// Decodes from `source`, or fails with `Status::OpenError` if there is none.
    pub fn decode_opt<R: Read>(&mut self, source: Option<R>) -> Status {
        match source {
            Some(r) => self.decode(r),
            None => {
                self.reset();
                self.fail(DecodingError::Open("no input"), Status::OpenError)
            }
        }
    }

    /// Decodes a GIF stream read from `r`, replacing previously decoded frames.
    pub fn decode<R: Read>(&mut self, r: R) -> Status {
        self.reset();
        self.status = Status::Parsing;
        let mut blocks = BlockReader::new(r);
        let mut state = State::Header;
        loop {
            match self.step(state, &mut blocks) {
                Ok(Some(next)) => state = next,
                Ok(None) => break,
                Err(err) => {
                    let status = match err {
                        DecodingError::Open(_) => Status::OpenError,
                        DecodingError::Io(_) if blocks.offset() == 0 => Status::OpenError,
                        _ => Status::FormatError,
                    };
                    return self.fail(err, status);
                }
            }
        }
        self.status = Status::Finished;
        debug!(
            "decoded {} frame(s) of {}x{}, loop count {}",
            self.frames.len(),
            self.width,
            self.height,
            self.loop_count
        );
        let frames = self.frames.len();
        self.emit(ParseEvent::Finished { frames });
        self.status
    }

    /// Releases all frames and returns to the idle state.
    pub fn free(&mut self) {
        self.reset();
        self.frames = Vec::new();
        self.global_palette = Vec::new();
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Whether the last decode reached the trailer
    pub fn succeeded(&self) -> bool {
        self.status == Status::Finished
    }

    /// The error that ended the last decode, if any
    pub fn error(&self) -> Option<&DecodingError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<DecodingError> {
        self.error.take()
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// Width of the logical screen
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Height of the logical screen
    pub fn height(&self) -> u16 {
        self.height
    }

    /// The global color palette
    pub fn global_palette(&self) -> &[u8] {
        &self.global_palette
    }

    /// Index of the background color in the global palette
    pub fn background_index(&self) -> u8 {
        self.background_index
    }

    pub fn pixel_aspect_ratio(&self) -> u8 {
        self.pixel_aspect_ratio
    }

    /// Number of animation iterations, 0 means forever
    pub fn loop_count(&self) -> u16 {
        self.loop_count
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Per-frame display times in milliseconds
    pub fn delays(&self) -> Vec<u32> {
        self.frames.iter().map(|f| f.delay).collect()
    }

    pub(crate) fn take_frames(&mut self) -> Vec<Frame> {
        mem::take(&mut self.frames)
    }

    fn reset(&mut self) {
        self.status = Status::Idle;
        self.version = None;
        self.width = 0;
        self.height = 0;
        self.global_palette.clear();
        self.background_index = 0;
        self.pixel_aspect_ratio = 0;
        self.clear_background = false;
        self.loop_count = 1;
        self.control = Control::default();
        self.stray_bytes = 0;
        self.frames.clear();
        self.retained = 0;
        self.error = None;
    }

    fn fail(&mut self, err: DecodingError, status: Status) -> Status {
        warn!(
            "GIF decoding stopped after {} frame(s): {}",
            self.frames.len(),
            err
        );
        self.status = status;
        self.error = Some(err);
        self.emit(ParseEvent::Failed(status));
        status
    }

    fn emit(&mut self, event: ParseEvent) {
        if let Some(listener) = self.listener.as_mut() {
            listener(&event)
        }
    }

    fn step<R: Read>(
        &mut self,
        state: State,
        r: &mut BlockReader<R>,
    ) -> Result<Option<State>, DecodingError> {
        use self::State::*;

        let next = match state {
            Header => {
                let mut magic = [0; 6];
                r.read_exact(&mut magic)?;
                if &magic[..3] != b"GIF" {
                    return Err(DecodingError::Format("malformed GIF header"));
                }
                let version = Version::from_tag([magic[3], magic[4], magic[5]]);
                if let Version::Unknown(tag) = version {
                    if self.strictness == Strictness::Strict {
                        return Err(DecodingError::Format("unsupported GIF version"));
                    }
                    debug!("accepting unknown GIF version {:?}", String::from_utf8_lossy(&tag));
                }
                self.version = Some(version);
                ScreenDescriptor
            }
            ScreenDescriptor => {
                self.width = r.read_u16()?;
                self.height = r.read_u16()?;
                let flags = r.read_u8()?;
                self.background_index = r.read_u8()?;
                self.pixel_aspect_ratio = r.read_u8()?;
                if self.canvas_len() > self.memory_limit.0 {
                    return Err(DecodingError::Format("logical screen exceeds the memory limit"));
                }
                if flags & 0x80 != 0 {
                    self.global_palette = read_palette(r, flags)?;
                }
                Blocks
            }
            Blocks => {
                let b = r.read_u8()?;
                match Block::from_u8(b) {
                    Some(Block::Image) => Image,
                    Some(Block::Extension) => {
                        let label = r.read_u8()?;
                        match Extension::from_u8(label) {
                            Some(Extension::Control) => GraphicControl,
                            Some(Extension::Application) => Application,
                            _ => {
                                trace!("skipping extension 0x{:02X}", label);
                                Skip
                            }
                        }
                    }
                    Some(Block::Trailer) => {
                        if self.frames.is_empty() {
                            return Err(DecodingError::Format("no image before trailer"));
                        }
                        return Ok(None);
                    }
                    None => {
                        self.stray_bytes += 1;
                        if self.strictness == Strictness::Strict || self.stray_bytes > 1 {
                            return Err(DecodingError::Format(
                                "unknown block type encountered",
                            ));
                        }
                        debug!("ignoring stray byte 0x{:02X} at offset {}", b, r.offset() - 1);
                        Blocks
                    }
                }
            }
            GraphicControl => {
                self.read_control_extension(r)?;
                Blocks
            }
            Application => {
                self.read_application_extension(r)?;
                Blocks
            }
            Skip => {
                r.skip_blocks()?;
                Blocks
            }
            Image => {
                self.read_image(r)?;
                Blocks
            }
        };
        Ok(Some(next))
    }

    fn read_control_extension<R: Read>(
        &mut self,
        r: &mut BlockReader<R>,
    ) -> Result<(), DecodingError> {
        let (len, fields) = {
            let block = r.read_block()?;
            let fields = match block {
                [flags, lo, hi, trns, ..] => Some((*flags, u16::from_le_bytes([*lo, *hi]), *trns)),
                _ => None,
            };
            (block.len(), fields)
        };
        if len != 4 && self.strictness == Strictness::Strict {
            return Err(DecodingError::Format("control extension has wrong length"));
        }
        match fields {
            Some((flags, delay, trns)) => {
                self.control = Control {
                    delay: delay as u32 * 10,
                    dispose: DisposalMethod::from_flags(flags),
                    transparent: if flags & 1 != 0 { Some(trns) } else { None },
                };
            }
            None => debug!("ignoring short graphic control extension ({} bytes)", len),
        }
        if len > 0 {
            r.skip_blocks()?;
        }
        Ok(())
    }

    fn read_application_extension<R: Read>(
        &mut self,
        r: &mut BlockReader<R>,
    ) -> Result<(), DecodingError> {
        let looping = {
            let block = r.read_block()?;
            if block.is_empty() {
                return Ok(());
            }
            block == b"NETSCAPE2.0" || block == b"ANIMEXTS1.0"
        };
        if !looping {
            r.skip_blocks()?;
            return Ok(());
        }
        loop {
            let block = r.read_block()?;
            match block {
                [] => break,
                [1, lo, hi, ..] => self.loop_count = u16::from_le_bytes([*lo, *hi]),
                _ => {}
            }
        }
        trace!("loop count {}", self.loop_count);
        Ok(())
    }

    fn read_image<R: Read>(&mut self, r: &mut BlockReader<R>) -> Result<(), DecodingError> {
        let left = r.read_u16()?;
        let top = r.read_u16()?;
        let width = r.read_u16()?;
        let height = r.read_u16()?;
        let rect = Rect::new(left, top, width, height);
        let flags = r.read_u8()?;
        let interlaced = flags & 0x40 != 0;
        let local_palette = if flags & 0x80 != 0 {
            Some(read_palette(r, flags)?)
        } else {
            None
        };
        // Graphic control values apply to this image only
        let control = mem::take(&mut self.control);

        let palette: &[u8] = match local_palette {
            Some(ref table) => table,
            None => &self.global_palette,
        };
        if palette.is_empty() {
            return Err(DecodingError::Format("no color table available for image"));
        }

        let needed = self
            .retained
            .saturating_add(self.canvas_len())
            .saturating_add(rect.area());
        if needed > self.memory_limit.0 {
            return Err(DecodingError::Format("image exceeds the memory limit"));
        }
        let mut indices = Vec::new();
        indices
            .try_reserve_exact(rect.area())
            .map_err(|_| DecodingError::Format("cannot allocate image data"))?;
        indices.resize(rect.area(), 0);

        let min_code_size = r.read_u8()?;
        match self.lzw.decode(min_code_size, r, &mut indices) {
            Ok(decoded) => {
                if decoded.pixels < indices.len() {
                    debug!(
                        "frame {} is missing {} of {} pixels",
                        self.frames.len(),
                        indices.len() - decoded.pixels,
                        indices.len()
                    );
                }
            }
            Err(LzwError::Io(err)) => return Err(DecodingError::Io(err)),
            Err(err) if self.strictness == Strictness::Strict => return Err(err.into()),
            Err(err) => {
                warn!("corrupt image data in frame {}: {}", self.frames.len(), err);
                match err {
                    LzwError::InvalidCode(_) => r.finish_data()?,
                    LzwError::CodeSize(_) => r.skip_blocks()?,
                    _ => {}
                }
            }
        }

        let assembler = FrameAssembler::new(self.width, self.height, self.background());
        if local_palette.is_none() && control.transparent == Some(self.background_index) {
            self.clear_background = true;
        }
        let count = self.frames.len();
        let prior = self.frames.last().map(|last| Prior {
            canvas: &last.buffer,
            dispose: last.dispose,
            rect: last.rect,
            transparent: last.transparent.is_some(),
            before: count.checked_sub(2).map(|i| &self.frames[i].buffer[..]),
        });
        let buffer = assembler
            .compose(
                &SubImage {
                    palette,
                    indices: &indices,
                    rect,
                    interlaced,
                    transparent: control.transparent,
                },
                prior.as_ref(),
            )
            .map_err(|_| DecodingError::Format("cannot allocate frame canvas"))?;

        let indexed = self.color_output == ColorOutput::Indexed;
        let kept_palette = if indexed { Some(palette.to_vec()) } else { None };
        self.retained += buffer.len() + if indexed { indices.len() } else { 0 };
        self.frames.push(Frame {
            width: self.width,
            height: self.height,
            delay: control.delay,
            dispose: control.dispose,
            rect,
            transparent: control.transparent,
            interlaced,
            buffer,
            indices: if indexed { Some(indices) } else { None },
            palette: kept_palette,
        });

        let index = self.frames.len() - 1;
        trace!("frame {} ready, {:?}, delay {} ms", index, rect, control.delay);
        self.emit(ParseEvent::FrameReady {
            index,
            first: index == 0,
        });
        Ok(())
    }

    fn canvas_len(&self) -> usize {
        self.width as usize * self.height as usize * N_CHANNELS
    }

    /// RGBA color of the background index.
    ///
    /// Transparent without a global table, or once the background index was
    /// used as the transparent index of a global-table image.
    fn background(&self) -> [u8; 4] {
        if self.clear_background {
            return [0; 4];
        }
        let offset = self.background_index as usize * PLTE_CHANNELS;
        match self.global_palette.get(offset..offset + PLTE_CHANNELS) {
            Some(rgb) => [rgb[0], rgb[1], rgb[2], 0xFF],
            None => [0; 4],
        }
    }
}

/// Reads a color table whose size is encoded in the low bits of `flags`.
fn read_palette<R: Read>(r: &mut BlockReader<R>, flags: u8) -> Result<Vec<u8>, DecodingError> {
    let entries = 2usize << (flags & 0b111);
    let mut table = vec![0; entries * PLTE_CHANNELS];
    r.read_exact(&mut table)?;
    Ok(table)
}
