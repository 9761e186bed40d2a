
//! Specialized binary input and output.
//! Uses the error handling for this crate.

pub use std::io::{Read, Write};

use half::f16;
use half::slice::HalfFloatSliceExt;
use lebe::prelude::*;

use crate::error::{Error, Result, UnitResult};
use std::io::{Seek, SeekFrom};
use std::sync::Mutex;


/// Peek a single byte without consuming it.
#[derive(Debug)]
pub struct PeekRead<T> {
    /// Cannot be exposed as it will not contain peeked values anymore.
    inner: T,

    peeked: Option<std::io::Result<u8>>,
}

impl<T: Read> PeekRead<T> {

    /// Wrap a reader to enable peeking.
    #[inline]
    pub fn new(inner: T) -> Self {
        Self { inner, peeked: None }
    }

    /// Read a single byte and return that without consuming it.
    /// The next `read` call will include that byte.
    #[inline]
    pub fn peek_u8(&mut self) -> &std::io::Result<u8> {
        self.peeked = self.peeked.take().or_else(|| Some(u8::read_from_little_endian(&mut self.inner)));
        self.peeked.as_ref().unwrap() // unwrap cannot fail because we just set it
    }

    /// Skip a single byte if it equals the specified value.
    /// Returns whether the value was found.
    /// Consumes the peeked result if an error occurred.
    #[inline]
    pub fn skip_if_eq(&mut self, value: u8) -> std::io::Result<bool> {
        match self.peek_u8() {
            Ok(peeked) if *peeked == value =>  {
                self.peeked = None; // consume the byte
                Ok(true)
            },

            Ok(_) => Ok(false),

            // return the error otherwise.
            // unwrap is safe because this branch cannot be reached otherwise.
            // we need to take() from self because io errors cannot be cloned.
            Err(_) => Err(self.peeked.take().unwrap().err().unwrap())
        }
    }
}


impl<T: Read> Read for PeekRead<T> {
    fn read(&mut self, target_buffer: &mut [u8]) -> std::io::Result<usize> {
        if target_buffer.is_empty() {
            return Ok(0)
        }

        match self.peeked.take() {
            None => self.inner.read(target_buffer),
            Some(peeked) => {
                target_buffer[0] = peeked?;

                // indexing [1..] is safe because an empty buffer already returned ok
                Ok(1 + self.inner.read(&mut target_buffer[1..])?)
            }
        }
    }
}


/// A byte source supporting thread-safe positioned reads, in the manner of `pread`.
/// Chunk decoding issues all its stream operations through this trait,
/// which is why multiple threads can decode chunks of one open file concurrently.
pub trait ReadAt {

    /// Read bytes starting at the specified absolute position.
    /// Returns how many bytes were read. Zero means end of stream.
    fn read_at(&self, position: u64, buffer: &mut [u8]) -> Result<usize>;

    /// Total number of bytes in the stream.
    fn byte_len(&self) -> Result<u64>;

    /// Fill the whole buffer from the specified absolute position,
    /// failing with a read error if the stream ends too soon.
    fn read_exact_at(&self, mut position: u64, mut buffer: &mut [u8]) -> UnitResult {
        while !buffer.is_empty() {
            let count = self.read_at(position, buffer)?;

            if count == 0 {
                return Err(Error::read_io(std::io::ErrorKind::UnexpectedEof.into()));
            }

            position += count as u64;
            buffer = &mut buffer[count ..];
        }

        Ok(())
    }
}

/// A byte sink supporting thread-safe positioned writes, in the manner of `pwrite`.
/// Concurrent chunk encoding relies on writers at disjoint positions not disturbing each other.
pub trait WriteAt {

    /// Write the bytes at the specified absolute position.
    /// Returns how many bytes were accepted.
    fn write_at(&self, position: u64, buffer: &[u8]) -> Result<usize>;

    /// Write the whole buffer at the specified absolute position,
    /// failing with a write error if the stream accepts fewer bytes.
    fn write_all_at(&self, mut position: u64, mut buffer: &[u8]) -> UnitResult {
        while !buffer.is_empty() {
            let count = self.write_at(position, buffer)?;

            if count == 0 {
                return Err(Error::write_io(std::io::ErrorKind::WriteZero.into()));
            }

            position += count as u64;
            buffer = &buffer[count ..];
        }

        Ok(())
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, position: u64, buffer: &mut [u8]) -> Result<usize> {
        let start = (position as usize).min(self.len());
        let end = (start + buffer.len()).min(self.len());

        let count = end - start;
        buffer[.. count].copy_from_slice(&self[start .. end]);
        Ok(count)
    }

    fn byte_len(&self) -> Result<u64> {
        Ok(self.len() as u64)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, position: u64, buffer: &mut [u8]) -> Result<usize> {
        self.as_slice().read_at(position, buffer)
    }

    fn byte_len(&self) -> Result<u64> {
        self.as_slice().byte_len()
    }
}

impl<R: ReadAt + ?Sized> ReadAt for &'_ R {
    fn read_at(&self, position: u64, buffer: &mut [u8]) -> Result<usize> {
        (**self).read_at(position, buffer)
    }

    fn byte_len(&self) -> Result<u64> {
        (**self).byte_len()
    }
}

impl<W: WriteAt + ?Sized> WriteAt for &'_ W {
    fn write_at(&self, position: u64, buffer: &[u8]) -> Result<usize> {
        (**self).write_at(position, buffer)
    }
}


/// Adapts any seekable stream to the positioned contract
/// by serializing all accesses through a mutex guarding the single cursor.
/// Use this for streams without native positioned access, such as `std::fs::File`
/// on platforms without `pread`, or an in-memory `std::io::Cursor`.
#[derive(Debug)]
pub struct SharedCursor<T> {
    inner: Mutex<T>,
}

impl<T> SharedCursor<T> {

    /// Take exclusive ownership of the stream. The cursor position
    /// of the stream is managed by this wrapper from now on.
    pub fn new(inner: T) -> Self {
        SharedCursor { inner: Mutex::new(inner) }
    }

    /// Unwrap the inner stream, for example to inspect written bytes.
    pub fn into_inner(self) -> T {
        match self.inner.into_inner() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, T>> {
        self.inner.lock().map_err(|_| Error::invalid("stream lock poisoned by a panicked thread"))
    }
}

impl<T: Read + Seek> ReadAt for SharedCursor<T> {
    fn read_at(&self, position: u64, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.lock()?;
        inner.seek(SeekFrom::Start(position)).map_err(Error::read_io)?;
        inner.read(buffer).map_err(Error::read_io)
    }

    fn byte_len(&self) -> Result<u64> {
        let mut inner = self.lock()?;
        inner.seek(SeekFrom::End(0)).map_err(Error::read_io)
    }
}

impl<T: Write + Seek> WriteAt for SharedCursor<T> {
    fn write_at(&self, position: u64, buffer: &[u8]) -> Result<usize> {
        let mut inner = self.lock()?;

        inner.seek(SeekFrom::Start(position)).map_err(Error::write_io)?;
        let count = inner.write(buffer).map_err(Error::write_io)?;
        inner.flush().map_err(Error::write_io)?;

        Ok(count)
    }
}


/// Adapts a positioned stream to sequential reading,
/// tracking its own cursor. Used for parsing the header region,
/// which the file format lays out strictly front to back.
#[derive(Debug)]
pub struct StreamReader<R> {
    stream: R,
    position: u64,
}

impl<R: ReadAt> StreamReader<R> {

    /// Start sequential reading at the beginning of the stream.
    pub fn new(stream: R) -> Self {
        StreamReader { stream, position: 0 }
    }

    /// Start sequential reading at the specified absolute position,
    /// for example at a chunk offset taken from the offset table.
    pub fn starting_at(stream: R, position: u64) -> Self {
        StreamReader { stream, position }
    }

    /// The position the next `read` call will read from.
    pub fn byte_position(&self) -> u64 {
        self.position
    }

    /// Unwrap the underlying positioned stream.
    pub fn into_inner(self) -> R {
        self.stream
    }
}

impl<R: ReadAt> Read for StreamReader<R> {
    fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
        let count = self.stream.read_at(self.position, buffer)
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::Other, error))?;

        self.position += count as u64;
        Ok(count)
    }
}


/// Generic trait that defines common binary operations such as reading and writing for this type.
pub trait Data: Sized + Default + Clone {

    /// Number of bytes this would consume in an exr file.
    const BYTE_SIZE: usize = std::mem::size_of::<Self>();

    /// Read a value of type `Self`.
    fn read(read: &mut impl Read) -> Result<Self>;

    /// Read as many values of type `Self` as fit into the specified slice.
    /// If the slice cannot be filled completely, returns `Error::ReadIo`.
    fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult;

    /// Read as many values of type `Self` as specified with `data_size`.
    ///
    /// This method will not allocate more memory than `soft_max` at once.
    /// If `hard_max` is specified, a larger declared size fails
    /// before any allocation happens.
    #[inline]
    fn read_vec(read: &mut impl Read, data_size: usize, soft_max: usize, hard_max: Option<usize>, purpose: &'static str) -> Result<Vec<Self>> {
        let mut vec = Vec::with_capacity(data_size.min(soft_max));
        Self::read_into_vec(read, &mut vec, data_size, soft_max, hard_max, purpose)?;
        Ok(vec)
    }

    /// Write this value to the writer.
    fn write(self, write: &mut impl Write) -> UnitResult;

    /// Write all values of that slice to the writer.
    fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult;


    /// Read as many values of type `Self` as specified with `data_size` into the provided vector.
    ///
    /// This method will not allocate more memory than `soft_max` at once.
    /// If `hard_max` is specified, a larger declared size fails
    /// before any allocation happens.
    #[inline]
    fn read_into_vec(read: &mut impl Read, data: &mut Vec<Self>, data_size: usize, soft_max: usize, hard_max: Option<usize>, purpose: &'static str) -> UnitResult {
        if let Some(max) = hard_max {
            if data_size > max {
                return Err(Error::OutOfMemory(purpose.into()))
            }
        }

        let soft_max = hard_max.unwrap_or(soft_max).min(soft_max);
        let end = data.len() + data_size;

        // do not allocate more than `soft_max` elements at once
        // (most of the time, this loop will run only once)
        while data.len() < end {
            let chunk_start = data.len();
            let chunk_end = (chunk_start + soft_max).min(end);

            data.resize(chunk_end, Self::default());
            Self::read_slice(read, &mut data[chunk_start .. chunk_end])?;
        }

        Ok(())
    }

    /// Write the length of the slice as `i32` and then its contents.
    #[inline]
    fn write_i32_sized_slice<W: Write>(write: &mut W, slice: &[Self]) -> UnitResult {
        crate::error::usize_to_i32(slice.len(), "byte array length")?.write(write)?;
        Self::write_slice(write, slice)
    }

    /// Read the element count as `i32` and then read that many items into a vector.
    ///
    /// This method will not allocate more memory than `soft_max` at once.
    /// If `hard_max` is specified, a larger declared size fails
    /// before any allocation happens.
    #[inline]
    fn read_i32_sized_vec(read: &mut impl Read, soft_max: usize, hard_max: Option<usize>, purpose: &'static str) -> Result<Vec<Self>> {
        let size = i32_to_usize_for(i32::read(read)?, purpose)?;
        Self::read_vec(read, size, soft_max, hard_max, purpose)
    }
}

#[inline]
fn i32_to_usize_for(size: i32, purpose: &'static str) -> Result<usize> {
    crate::error::i32_to_usize(size, purpose)
}


macro_rules! implement_data_for_primitive {
    ($kind: ident) => {
        impl Data for $kind {
            #[inline]
            fn read(read: &mut impl Read) -> Result<Self> {
                read.read_from_little_endian().map_err(Error::read_io)
            }

            #[inline]
            fn write(self, write: &mut impl Write) -> UnitResult {
                write.write_as_little_endian(&self).map_err(Error::write_io)
            }

            #[inline]
            fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult {
                read.read_from_little_endian_into(slice).map_err(Error::read_io)
            }

            #[inline]
            fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult {
                write.write_as_little_endian(slice).map_err(Error::write_io)
            }
        }
    };
}

implement_data_for_primitive!(u8);
implement_data_for_primitive!(i8);
implement_data_for_primitive!(i16);
implement_data_for_primitive!(u16);
implement_data_for_primitive!(u32);
implement_data_for_primitive!(i32);
implement_data_for_primitive!(i64);
implement_data_for_primitive!(u64);
implement_data_for_primitive!(f32);
implement_data_for_primitive!(f64);


impl Data for f16 {
    #[inline]
    fn read(read: &mut impl Read) -> Result<Self> {
        u16::read(read).map(f16::from_bits)
    }

    #[inline]
    fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult {
        let bits = slice.reinterpret_cast_mut();
        u16::read_slice(read, bits)
    }

    #[inline]
    fn write(self, write: &mut impl Write) -> UnitResult {
        self.to_bits().write(write)
    }

    #[inline]
    fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult {
        let bits = slice.reinterpret_cast();
        u16::write_slice(write, bits)
    }
}
