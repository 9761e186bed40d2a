
//! Contains the compression attribute definition
//! and methods to compress and decompress data.

// private modules make non-breaking changes easier
mod rle;
mod zip;

use crate::error::{Error, Result};
use crate::meta::attribute::SampleType;


/// A byte vector.
pub type ByteVec = Vec<u8>;

/// A byte slice.
pub type Bytes<'s> = &'s [u8];

/// Specifies which compression method to use.
/// Use uncompressed data for fastest loading and writing speeds.
/// Use RLE compression for fast loading and writing with slight memory savings.
/// Use ZIP compression for slow processing with large memory savings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {

    /// Store uncompressed values.
    /// Produces large files that can be read and written very quickly.
    /// Consider using RLE instead, as it provides some compression with almost equivalent speed.
    Uncompressed,

    /// Produces slightly smaller files
    /// that can still be read and written rather quickly.
    /// The compressed file size is usually between 60 and 75 percent of the uncompressed size.
    /// Works best for images with large flat areas, such as masks and abstract graphics.
    /// This compression method is lossless.
    RLE,

    /// Uses ZIP compression to compress each line. Slowly produces small images
    /// which can be read with moderate speed. This compression method is lossless.
    /// Might be slightly faster but larger than `ZIP16`.
    ZIP1,

    /// Uses ZIP compression to compress blocks of 16 lines. Slowly produces small images
    /// which can be read with moderate speed. This compression method is lossless.
    /// Might be slightly slower but smaller than `ZIP1`.
    ZIP16,

    /// PIZ compression works well for noisy and natural images. Works better with larger tiles.
    /// Only supported for flat images, but not for deep data.
    /// This compression method is lossless.
    /// __This compression is recognized but not yet implemented by this crate.__
    PIZ,

    /// Like `ZIP1`, but reduces precision of `f32` images to `f24`.
    /// This produces really small image files. Only supported for flat images, not for deep data.
    /// __This compression is recognized but not yet implemented by this crate.__
    PXR24,

    /// This is a lossy compression method for f16 images.
    /// It's the predecessor of the `B44A` compression,
    /// which has improved compression rates for uniformly colored areas.
    /// __This compression is recognized but not yet implemented by this crate.__
    B44,

    /// This is a lossy compression method for f16 images.
    /// All f32 and u32 channels will be stored without compression.
    /// __This compression is recognized but not yet implemented by this crate.__
    B44A,

    /// Lossy DCT based compression, in blocks of 32 scan lines.
    /// More efficient for partial buffer access.
    /// __This compression is recognized but not yet implemented by this crate.__
    DWAA,

    /// Lossy DCT based compression, in blocks of 256 scan lines.
    /// More efficient space-wise and faster to decode full frames than `DWAA`.
    /// __This compression is recognized but not yet implemented by this crate.__
    DWAB,
}

impl std::fmt::Display for Compression {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{} compression", match self {
            Compression::Uncompressed => "no",
            Compression::RLE => "rle",
            Compression::ZIP1 => "zip line",
            Compression::ZIP16 => "zip block",
            Compression::B44 => "b44",
            Compression::B44A => "b44a",
            Compression::DWAA => "dwaa",
            Compression::DWAB => "dwab",
            Compression::PIZ => "piz",
            Compression::PXR24 => "pxr24",
        })
    }
}


impl Compression {

    /// Compress the bytes of an uncompressed block.
    ///
    /// Whenever the compressed form would not be smaller than the input,
    /// the input bytes are returned unchanged and stored raw, as mandated
    /// by the file format. Sample bytes are little endian.
    pub fn compress_block(self, uncompressed: Bytes<'_>) -> Result<ByteVec> {
        use self::Compression::*;

        let compressed = match self {
            Uncompressed => return Ok(uncompressed.to_vec()),
            RLE => rle::compress_bytes(uncompressed)?,
            ZIP16 | ZIP1 => zip::compress_bytes(uncompressed)?,

            _ => return Err(Error::unsupported(format!(
                "cannot compress pixels, as {} is not yet implemented", self
            ))),
        };

        // only write the compressed data if it actually is smaller than raw
        if compressed.len() < uncompressed.len() { Ok(compressed) }
        else { Ok(uncompressed.to_vec()) }
    }

    /// Decompress the bytes of a chunk into the uncompressed block form.
    ///
    /// When the compressed length equals the expected uncompressed length,
    /// the bytes were stored raw and are returned unchanged.
    /// Errors for any result that does not have the expected byte size.
    pub fn decompress_block(self, compressed: Bytes<'_>, expected_byte_size: usize) -> Result<ByteVec> {
        use self::Compression::*;

        // compression did not make this block smaller, so it was stored raw.
        // this is always the case for uncompressed blocks.
        if compressed.len() == expected_byte_size {
            return Ok(compressed.to_vec());
        }

        let bytes = match self {
            Uncompressed => Err(Error::invalid("uncompressed block byte count")),
            RLE => rle::decompress_bytes(compressed, expected_byte_size),
            ZIP16 | ZIP1 => zip::decompress_bytes(compressed, expected_byte_size),

            _ => Err(Error::unsupported(format!(
                "cannot decompress pixels, as {} is not yet implemented", self
            ))),
        };

        let bytes = bytes.map_err(|error| match error {
            Error::NotSupported(message) => Error::NotSupported(message),
            error => Error::invalid(format!("compressed data ({})", error)),
        })?;

        if bytes.len() != expected_byte_size {
            Err(Error::invalid("decompressed data byte count"))
        }
        else { Ok(bytes) }
    }

    /// For scan line images and deep scan line images, one or more scan lines may be
    /// stored together as a scan line block. The number of scan lines per block
    /// depends on how the pixel data are compressed.
    pub fn scan_lines_per_block(self) -> usize {
        use self::Compression::*;
        match self {
            Uncompressed | RLE | ZIP1   => 1,
            ZIP16 | PXR24               => 16,
            PIZ | B44 | B44A | DWAA     => 32,
            DWAB                        => 256,
        }
    }

    /// Deep data can only be compressed using RLE or ZIP compression.
    pub fn supports_deep_data(self) -> bool {
        use self::Compression::*;
        match self {
            Uncompressed | RLE | ZIP1 => true,
            _ => false,
        }
    }

    /// Most compression methods will reconstruct the exact pixel bytes,
    /// but some might throw away unimportant data for specific types of samples.
    pub fn is_lossless_for(self, sample_type: SampleType) -> bool {
        use self::Compression::*;
        match self {
            PXR24 => sample_type != SampleType::F32, // pxr reduces f32 to f24
            B44 | B44A => sample_type != SampleType::F16, // b44 only compresses f16 values, others are left uncompressed
            Uncompressed | RLE | ZIP1 | ZIP16 | PIZ => true,
            DWAB | DWAA => false,
        }
    }

    /// Most compression methods will reconstruct the exact pixel bytes,
    /// but some might throw away unimportant data in some cases.
    pub fn may_loose_data(self) -> bool {
        use self::Compression::*;
        match self {
            Uncompressed | RLE | ZIP1 | ZIP16 | PIZ => false,
            PXR24 | B44 | B44A | DWAB | DWAA        => true,
        }
    }
}


/// A collection of functions used to prepare data for compression.
mod optimize_bytes {

    /// Integrate over all differences to the previous value in order to reconstruct sample values.
    pub fn differences_to_samples(buffer: &mut [u8]) {
        if buffer.is_empty() { return; }

        // The naive implementation is very simple:
        //
        // for index in 1..buffer.len() {
        //    buffer[index] = (buffer[index - 1] as i32 + buffer[index] as i32 - 128) as u8;
        // }
        //
        // But we process elements in pairs to take advantage of instruction-level parallelism.
        // When computations within a pair do not depend on each other, they can be processed in parallel.
        // Since this function is responsible for a very large chunk of execution time,
        // this tweak alone improves decoding performance of RLE images by 20%.
        let mut previous = buffer[0] as i16;
        for chunk in buffer[1..].chunks_exact_mut(2) {
            // no bounds checks here due to indices and chunk size being constant
            let diff0 = chunk[0] as i16;
            let diff1 = chunk[1] as i16;
            let sample0 = (previous + diff0 - 128) as u8;
            let sample1 = (previous + diff0 + diff1 - 128 * 2) as u8;
            chunk[0] = sample0;
            chunk[1] = sample1;
            previous = sample1 as i16;
        }

        // handle the remaining element at the end not processed by the loop over pairs, if present
        if buffer.len() % 2 == 0 {
            let diff = buffer.last_mut().expect("buffer is not empty");
            *diff = (previous + *diff as i16 - 128) as u8;
        }
    }

    /// Derive over all values in order to produce differences to the previous value.
    pub fn samples_to_differences(buffer: &mut [u8]){
        for index in (1..buffer.len()).rev() {
            buffer[index] = (buffer[index] as i32 - buffer[index - 1] as i32 + 128) as u8;
        }
    }

    /// Interleave the bytes such that the second half of the array is every other byte.
    pub fn interleave_byte_blocks(separated: &mut [u8]) {
        let mut interleaved = Vec::with_capacity(separated.len());
        let (first_half, second_half) = separated.split_at((separated.len() + 1) / 2);

        let mut second_half_iter = second_half.iter();
        for &first in first_half {
            interleaved.push(first);
            if let Some(&second) = second_half_iter.next() {
                interleaved.push(second);
            }
        }

        separated.copy_from_slice(interleaved.as_slice())
    }

    /// Separate the bytes such that the second half contains every other byte.
    pub fn separate_bytes_fragments(source: &mut [u8]) {
        let mut first_half = Vec::with_capacity((source.len() + 1) / 2);
        let mut second_half = Vec::with_capacity(source.len() / 2);

        for chunk in source.chunks(2) {
            first_half.push(chunk[0]);
            if let Some(&second) = chunk.get(1) {
                second_half.push(second);
            }
        }

        let mut result = first_half;
        result.append(&mut second_half);
        source.copy_from_slice(result.as_slice());
    }


    #[cfg(test)]
    pub mod test {

        #[test]
        fn roundtrip_interleave(){
            let source = vec![ 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10 ];
            let mut modified = source.clone();

            super::separate_bytes_fragments(&mut modified);
            super::interleave_byte_blocks(&mut modified);

            assert_eq!(source, modified);
        }

        #[test]
        fn roundtrip_derive(){
            let source = vec![ 0, 1, 2, 7, 4, 5, 6, 7, 13, 9, 10 ];
            let mut modified = source.clone();

            super::samples_to_differences(&mut modified);
            super::differences_to_samples(&mut modified);

            assert_eq!(source, modified);
        }

        #[test]
        fn derive_single_byte_and_empty(){
            let mut empty: Vec<u8> = vec![];
            super::samples_to_differences(&mut empty);
            super::differences_to_samples(&mut empty);
            assert!(empty.is_empty());

            let mut single = vec![ 123 ];
            super::samples_to_differences(&mut single);
            super::differences_to_samples(&mut single);
            assert_eq!(single, vec![ 123 ]);
        }
    }
}
