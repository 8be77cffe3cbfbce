mod encoder;

pub use self::encoder::{Encoder, ExtensionData};
