//! Traits used in this library
use std::io;

/// Configuration parameter trait
///
/// A value that knows how to apply itself to `Object`, e.g. a
/// [`Strictness`](crate::Strictness) level applied to a decoder.
pub trait Parameter<Object> {
    fn set_param(self, this: &mut Object);
}

/// Object has parameters
pub trait HasParameters: Sized {
    fn set<T: Parameter<Self>>(&mut self, value: T) -> &mut Self {
        value.set_param(self);
        self
    }
}

/// Reader extension to read little endian data
pub trait ReadBytesExt<T> {
    fn read_le(&mut self) -> io::Result<T>;
}

impl<R: io::Read + ?Sized> ReadBytesExt<u8> for R {
    #[inline]
    fn read_le(&mut self) -> io::Result<u8> {
        let mut byte = [0];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }
}

impl<R: io::Read + ?Sized> ReadBytesExt<u16> for R {
    #[inline]
    fn read_le(&mut self) -> io::Result<u16> {
        let mut bytes = [0; 2];
        self.read_exact(&mut bytes)?;
        Ok(u16::from_le_bytes(bytes))
    }
}

/// Writer extension to write little endian data
pub trait WriteBytesExt<T> {
    fn write_le(&mut self, n: T) -> io::Result<()>;
}

impl<W: io::Write + ?Sized> WriteBytesExt<u8> for W {
    #[inline]
    fn write_le(&mut self, n: u8) -> io::Result<()> {
        self.write_all(&[n])
    }
}

impl<W: io::Write + ?Sized> WriteBytesExt<u16> for W {
    #[inline]
    fn write_le(&mut self, n: u16) -> io::Result<()> {
        self.write_all(&n.to_le_bytes())
    }
}

#[cfg(test)]
mod test {
    use super::{ReadBytesExt, WriteBytesExt};

    #[test]
    fn little_endian_u16() {
        let mut buf = Vec::new();
        buf.write_le(0x1234u16).unwrap();
        buf.write_le(0xABu8).unwrap();
        assert_eq!(buf, [0x34, 0x12, 0xAB]);

        let mut r = &buf[..];
        let n: u16 = r.read_le().unwrap();
        let b: u8 = r.read_le().unwrap();
        assert_eq!((n, b), (0x1234, 0xAB));
        assert!(ReadBytesExt::<u8>::read_le(&mut r).is_err());
    }
}
