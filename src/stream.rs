//! Sequential little-endian readers and writers, used to produce and consume the files that carry
//! [`records`](crate::records) outside of an image.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::records::Record;
use crate::Error;

fn stream_size<S: Seek>(stream: &mut S) -> Result<u64, Error> {
    let position = stream.stream_position()?;
    let size = stream.seek(SeekFrom::End(0))?;
    stream.seek(SeekFrom::Start(position))?;

    Ok(size)
}

/// Reads little-endian values one after another from a seekable source.
pub struct StreamReader<R: Read + Seek> {
    inner: R,
}
impl StreamReader<File> {
    pub fn open<P: AsRef<Path>>(filename: P) -> Result<Self, Error> {
        Ok(Self::new(File::open(filename)?))
    }
}
impl<R: Read + Seek> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.inner.read_u8()?)
    }
    pub fn read_u32(&mut self) -> Result<u32, Error> {
        Ok(self.inner.read_u32::<LittleEndian>()?)
    }
    pub fn read_u64(&mut self) -> Result<u64, Error> {
        Ok(self.inner.read_u64::<LittleEndian>()?)
    }
    /// Fill `data` completely, failing if the source ends first.
    pub fn read_exact(&mut self, data: &mut [u8]) -> Result<(), Error> {
        self.inner.read_exact(data)?;

        Ok(())
    }
    /// Read one fixed-width record.
    ///
    /// If fewer than [`SIZE`](Record::SIZE) bytes remain, fails with [`Error::Truncated`](Error::Truncated)
    /// and leaves the read position where it was.
    pub fn read_record<T: Record>(&mut self) -> Result<T, Error> {
        let position = self.position()?;
        let available = self.size()?.saturating_sub(position) as usize;

        if available < T::SIZE {
            return Err(Error::Truncated { needed: T::SIZE, available });
        }

        let mut bytes = vec![0u8; T::SIZE];
        self.read_exact(&mut bytes)?;

        Ok(T::decode(&bytes))
    }

    pub fn seek_from_start(&mut self, position: u64) -> Result<u64, Error> {
        Ok(self.inner.seek(SeekFrom::Start(position))?)
    }
    pub fn seek_from_end(&mut self, position: i64) -> Result<u64, Error> {
        Ok(self.inner.seek(SeekFrom::End(position))?)
    }
    pub fn seek_from_current(&mut self, position: i64) -> Result<u64, Error> {
        Ok(self.inner.seek(SeekFrom::Current(position))?)
    }
    pub fn position(&mut self) -> Result<u64, Error> {
        Ok(self.inner.stream_position()?)
    }
    /// Total length of the source. The read position is left where it was.
    pub fn size(&mut self) -> Result<u64, Error> {
        stream_size(&mut self.inner)
    }
}

/// Writes little-endian values one after another to a seekable sink.
pub struct StreamWriter<W: Write + Seek> {
    inner: W,
}
impl StreamWriter<File> {
    /// Create `filename`, or open it for appending if `append` is set.
    pub fn create<P: AsRef<Path>>(filename: P, append: bool) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(filename)?;

        Ok(Self::new(file))
    }
}
impl<W: Write + Seek> StreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), Error> {
        Ok(self.inner.write_u8(value)?)
    }
    pub fn write_u32(&mut self, value: u32) -> Result<(), Error> {
        Ok(self.inner.write_u32::<LittleEndian>(value)?)
    }
    pub fn write_u64(&mut self, value: u64) -> Result<(), Error> {
        Ok(self.inner.write_u64::<LittleEndian>(value)?)
    }
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        Ok(self.inner.write_all(data)?)
    }
    /// Write a string's UTF-8 bytes with no terminator.
    pub fn write_str(&mut self, value: &str) -> Result<(), Error> {
        self.write_all(value.as_bytes())
    }
    pub fn write_record<T: Record>(&mut self, record: &T) -> Result<(), Error> {
        record.write_to(&mut self.inner)
    }
    pub fn flush(&mut self) -> Result<(), Error> {
        Ok(self.inner.flush()?)
    }

    pub fn seek_from_start(&mut self, position: u64) -> Result<u64, Error> {
        Ok(self.inner.seek(SeekFrom::Start(position))?)
    }
    pub fn seek_from_end(&mut self, position: i64) -> Result<u64, Error> {
        Ok(self.inner.seek(SeekFrom::End(position))?)
    }
    pub fn seek_from_current(&mut self, position: i64) -> Result<u64, Error> {
        Ok(self.inner.seek(SeekFrom::Current(position))?)
    }
    pub fn position(&mut self) -> Result<u64, Error> {
        Ok(self.inner.stream_position()?)
    }
    /// Total length written so far. The write position is left where it was.
    pub fn size(&mut self) -> Result<u64, Error> {
        stream_size(&mut self.inner)
    }
}
