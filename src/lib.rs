//! # GIF decoding with a tiered image cache
//!
//! The crate has two halves. The GIF half decodes animated GIFs into full
//! canvas RGBA frames and can write indexed frames back out. The cache half
//! keeps downloaded byte payloads in memory and on disk and fetches misses
//! over the network.
//!
//! ```
//! use gifcache::{Encoder, IndexedFrame, Status};
//!
//! let mut data = Vec::new();
//! {
//!     let mut encoder = Encoder::new(&mut data, 2, 1);
//!     encoder.write_global_palette(&[0, 0, 0, 255, 255, 255]).unwrap();
//!     encoder.write_frame(&IndexedFrame::from_indices(2, 1, &[0, 1])).unwrap();
//! }
//! let animation = gifcache::decode(&data);
//! assert_eq!(animation.status(), Status::Finished);
//! assert_eq!(animation.frame(0).unwrap().pixel(1, 0), Some([255, 255, 255, 255]));
//! ```

#[macro_use]
extern crate enum_primitive;

mod reader;
mod traits;
mod types;
mod writer;

pub mod cache;

pub use crate::traits::{HasParameters, Parameter};
pub use crate::types::{Block, DisposalMethod, Extension, Frame, IndexedFrame, Rect, Version};
pub use crate::types::{N_CHANNELS, PLTE_CHANNELS};

pub use crate::reader::{decode, decode_from, Animation, Reader};
pub use crate::reader::{DecodingError, GifDecoder, LzwError, ParseEvent, Status};
/// Decoder configuration parameters
pub use crate::reader::{ColorOutput, MemoryLimit, Strictness};

pub use crate::writer::{Encoder, ExtensionData};

pub use crate::cache::{CacheConfig, Lookup, SharedCache, TieredCache, Tier};
