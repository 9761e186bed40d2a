
//! Describes all meta data possible in an exr file.

pub mod attribute;
pub mod header;


use crate::block::chunk::TileCoordinates;
use crate::compression::Compression;
use crate::error::*;
use crate::io::*;
use crate::math::*;
use crate::meta::header::{Blocks, Header};
use std::collections::HashSet;


/// Contains the complete meta data of an exr file.
/// Defines how the file is split up into parts,
/// the channels and chunk layout of each part,
/// and all attributes of each part.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaData {

    /// Some flags summarizing the features that must be supported to decode the file.
    pub requirements: Requirements,

    /// One header to describe each part in this file.
    pub headers: Vec<Header>,
}


/// The offset table is an ordered list of indices referencing pixel data in the exr file.
/// For each chunk of a part, an index exists, which points to the byte-location
/// of the corresponding pixel data in the file. That index can be used to load specific
/// portions of an image without processing all bytes in a file.
/// The indices are ordered to match the chunk enumeration of the part:
/// level by level, each level row by row, each row left to right.
pub type OffsetTable = Vec<u64>;

/// A summary of requirements that must be met to read this exr file.
/// Used to determine whether this file can be read by a given reader.
/// It includes the OpenEXR version number. This library aims to support version `2.0`.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Requirements {

    /// This library supports reading version 1 and 2, and writing version 2.
    pub file_format_version: u8,

    /// If true, this file has tiled blocks and contains only a single part.
    /// If false and not deep and not multipart, this file is a single part file with scan line blocks.
    pub is_single_part_and_tiled: bool,

    /// Whether this file has attribute or channel names
    /// with a length greater than 31 bytes.
    /// Names can never be longer than 255 bytes.
    pub has_long_names: bool,

    /// This file contains at least one part with deep data.
    pub has_deep_data: bool,

    /// Whether this file contains multiple parts.
    pub is_multipart_file: bool,
}


/// Locates a rectangular section of pixels in an image.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct TileIndices {

    /// Index of the tile.
    pub location: TileCoordinates,

    /// Pixel size of the tile.
    pub size: Vec2<usize>,
}


/// The first four bytes of each exr file.
/// Used to abort reading non-exr files.
pub mod magic_number {
    use super::*;

    /// The first four bytes of each exr file.
    pub const BYTES: [u8; 4] = [0x76, 0x2f, 0x31, 0x01];

    /// Without validation, write this instance to the byte stream.
    pub fn write(write: &mut impl Write) -> UnitResult {
        u8::write_slice(write, &self::BYTES)
    }

    /// Consumes four bytes from the reader and returns whether the file may be an exr file.
    pub fn is_exr(read: &mut impl Read) -> Result<bool> {
        let mut magic_num = [0; 4];
        u8::read_slice(read, &mut magic_num)?;
        Ok(magic_num == self::BYTES)
    }

    /// Validate the first four bytes. If they identify an exr file, return `Ok(())`.
    pub fn validate_exr(read: &mut impl Read) -> UnitResult {
        if self::is_exr(read)? {
            Ok(())
        }
        else {
            Err(Error::BadHeader("file identifier missing".into()))
        }
    }
}

/// A `0_u8` at the end of a sequence.
pub mod sequence_end {
    use super::*;

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        1
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(write: &mut W) -> UnitResult {
        0_u8.write(write)
    }

    /// Peeks the next byte. If it is zero, consumes the byte and returns true.
    pub fn has_come(read: &mut PeekRead<impl Read>) -> Result<bool> {
        read.skip_if_eq(0).map_err(Error::read_io)
    }
}


/// Compute the number of blocks required to contain all values.
pub fn compute_block_count(full_res: usize, tile_size: usize) -> usize {
    // round up, because if the image is not evenly divisible by the tiles,
    // we add another tile at the end (which is only partially used)
    RoundingMode::Up.divide(full_res, tile_size)
}

/// Compute the start position and size of a block inside a dimension.
#[inline]
pub fn calculate_block_position_and_size(total_size: usize, block_size: usize, block_index: usize) -> Result<(usize, usize)> {
    let block_position = block_size * block_index;

    Ok((
        block_position,
        calculate_block_size(total_size, block_size, block_position)?
    ))
}

/// Calculate the size of a single block. If this is the last block,
/// this only returns the required size, which is always smaller than the default block size.
#[inline]
pub fn calculate_block_size(total_size: usize, block_size: usize, block_position: usize) -> Result<usize> {
    if block_position >= total_size {
        return Err(Error::invalid("block index"))
    }

    if block_position + block_size <= total_size {
        Ok(block_size)
    }
    else {
        Ok(total_size - block_position)
    }
}

/// Calculate the number of mip levels in a given resolution.
pub fn compute_level_count(round: RoundingMode, full_res: usize) -> usize {
    round.log2(full_res) + 1
}

/// Calculate the size of a single mip level by index.
pub fn compute_level_size(round: RoundingMode, full_res: usize, level_index: usize) -> usize {
    assert!(level_index < std::mem::size_of::<usize>() * 8, "largest level size exceeds maximum integer value");
    round.divide(full_res,  1 << level_index).max(1)
}

/// Iterates over all rip map level resolutions of a given size, including the indices of each level.
/// The order of iteration matches the order of the chunks in the file.
pub fn rip_map_levels(round: RoundingMode, max_resolution: Vec2<usize>) -> impl Iterator<Item=(Vec2<usize>, Vec2<usize>)> {
    rip_map_indices(round, max_resolution).map(move |level_indices|{
        let width = compute_level_size(round, max_resolution.width(), level_indices.x());
        let height = compute_level_size(round, max_resolution.height(), level_indices.y());
        (level_indices, Vec2(width, height))
    })
}

/// Iterates over all mip map level resolutions of a given size, including the indices of each level.
/// The order of iteration matches the order of the chunks in the file.
pub fn mip_map_levels(round: RoundingMode, max_resolution: Vec2<usize>) -> impl Iterator<Item=(usize, Vec2<usize>)> {
    mip_map_indices(round, max_resolution)
        .map(move |level_index|{
            let width = compute_level_size(round, max_resolution.width(), level_index);
            let height = compute_level_size(round, max_resolution.height(), level_index);
            (level_index, Vec2(width, height))
        })
}

/// Iterates over all rip map level indices of a given size.
/// The order of iteration matches the order of the chunks in the file.
pub fn rip_map_indices(round: RoundingMode, max_resolution: Vec2<usize>) -> impl Iterator<Item=Vec2<usize>> {
    let (width, height) = (
        compute_level_count(round, max_resolution.width()),
        compute_level_count(round, max_resolution.height())
    );

    (0..height).flat_map(move |y_level|{
        (0..width).map(move |x_level|{
            Vec2(x_level, y_level)
        })
    })
}

/// Iterates over all mip map level indices of a given size.
/// The order of iteration matches the order of the chunks in the file.
pub fn mip_map_indices(round: RoundingMode, max_resolution: Vec2<usize>) -> impl Iterator<Item=usize> {
    0..compute_level_count(round, max_resolution.width().max(max_resolution.height()))
}

/// Compute the number of chunks that a part is divided into. May be an expensive operation.
pub fn compute_chunk_count(compression: Compression, data_size: Vec2<usize>, blocks: Blocks) -> usize {

    if let Blocks::Tiles(tiles) = blocks {
        let round = tiles.rounding_mode;
        let Vec2(tile_width, tile_height) = tiles.tile_size;

        use crate::meta::attribute::LevelMode::*;
        match tiles.level_mode {
            Singular => {
                let tiles_x = compute_block_count(data_size.width(), tile_width);
                let tiles_y = compute_block_count(data_size.height(), tile_height);
                tiles_x * tiles_y
            }

            MipMap => {
                mip_map_levels(round, data_size).map(|(_, Vec2(level_width, level_height))| {
                    compute_block_count(level_width, tile_width) * compute_block_count(level_height, tile_height)
                }).sum()
            },

            RipMap => {
                rip_map_levels(round, data_size).map(|(_, Vec2(level_width, level_height))| {
                    compute_block_count(level_width, tile_width) * compute_block_count(level_height, tile_height)
                }).sum()
            }
        }
    }

    // scan line blocks never have mip maps
    else {
        compute_block_count(data_size.height(), compression.scan_lines_per_block())
    }
}


impl MetaData {

    /// Infer version requirements from headers.
    pub fn new(headers: Vec<Header>) -> Self {
        MetaData {
            requirements: Requirements::infer(headers.as_slice()),
            headers,
        }
    }

    /// Read the exr meta data from a byte stream.
    /// Validates the resulting meta data.
    pub fn read_from_buffered(buffered: impl Read) -> Result<Self> {
        let mut read = PeekRead::new(buffered);
        Self::read_validated_from_buffered_peekable(&mut read)
    }

    /// Does __not validate__ the meta data.
    pub(crate) fn read_unvalidated_from_buffered_peekable(read: &mut PeekRead<impl Read>) -> Result<Self> {
        magic_number::validate_exr(read)?;
        let requirements = Requirements::read(read)?;
        let headers = Header::read_all(read, &requirements)?;
        Ok(MetaData { requirements, headers })
    }

    /// Validates the meta data after reading.
    pub(crate) fn read_validated_from_buffered_peekable(read: &mut PeekRead<impl Read>) -> Result<Self> {
        let meta_data = Self::read_unvalidated_from_buffered_peekable(read)?;
        meta_data.validate()?;
        Ok(meta_data)
    }

    /// Validates the meta data and writes it to the stream.
    pub(crate) fn write_validating_to_buffered(&self, write: &mut impl Write) -> UnitResult {
        self.validate()?;

        magic_number::write(write)?;
        self.requirements.write(write)?;
        Header::write_all(self.headers.as_slice(), write, self.requirements.is_multipart())?;
        Ok(())
    }

    /// Read one offset table from the reader for each header.
    pub fn read_offset_tables(read: &mut impl Read, headers: &[Header]) -> Result<Vec<OffsetTable>> {
        headers.iter()
            .map(|header| u64::read_vec(
                read, header.chunk_count,
                u16::MAX as usize, None, "offset table length"
            ))
            .collect()
    }

    /// Number of bytes all offset tables of these headers consume in the file.
    pub fn offset_tables_byte_size(headers: &[Header]) -> usize {
        let chunk_count: usize = headers.iter().map(|header| header.chunk_count).sum();
        chunk_count * u64::BYTE_SIZE
    }

    /// The exact number of bytes the serialized meta data consumes,
    /// from the magic number up to and excluding the offset tables.
    pub fn byte_size(&self) -> usize {
        let headers: usize = self.headers.iter().map(Header::byte_size).sum();
        let multipart_end = if self.requirements.is_multipart() { sequence_end::byte_size() } else { 0 };
        magic_number::BYTES.len() + u32::BYTE_SIZE + headers + multipart_end
    }

    /// Validates this meta data.
    pub fn validate(&self) -> UnitResult {
        self.requirements.validate()?;

        if self.headers.is_empty() {
            return Err(Error::invalid("at least one part is required"));
        }

        if !self.requirements.is_multipart() && self.headers.len() != 1 {
            return Err(Error::invalid("multipart flag for header count"));
        }

        for header in &self.headers {
            header.validate(&self.requirements)?;
        }

        // part names must be unique
        if self.headers.len() > 1 {
            let mut header_names = HashSet::with_capacity(self.headers.len());
            for header in &self.headers {
                if !header_names.insert(&header.name) {
                    return Err(Error::invalid(format!(
                        "duplicate part name: `{}`",
                        header.name.as_ref().expect("header validation bug")
                    )));
                }
            }
        }

        // the long name flag must cover all names actually used
        if !self.requirements.has_long_names {
            let max_name_len = self.headers.iter().map(Header::max_name_len).max().unwrap_or(0);
            if max_name_len > attribute::SHORT_NAME_MAX_LEN {
                return Err(Error::NameTooLong("name longer than 31 bytes without the long name flag".into()));
            }
        }

        Ok(())
    }
}


impl Requirements {

    /// Create default requirements for a file with the
    /// specified part count and long name mode.
    pub fn new(multipart: bool, long_names: bool) -> Self {
        Requirements {
            file_format_version: 2,
            is_single_part_and_tiled: false,
            has_long_names: long_names,
            has_deep_data: false,
            is_multipart_file: multipart,
        }
    }

    /// Infer version requirements from headers.
    pub fn infer(headers: &[Header]) -> Self {
        let is_multipart = headers.len() > 1;

        let first_header_has_tiles = headers.iter().next()
            .map_or(false, |header| header.has_tiles());

        let has_long_names = headers.iter()
            .any(|header| header.max_name_len() > attribute::SHORT_NAME_MAX_LEN);

        Requirements {
            file_format_version: 2,
            is_single_part_and_tiled: !is_multipart && first_header_has_tiles,
            has_long_names,
            has_deep_data: false,
            is_multipart_file: is_multipart,
        }
    }

    // this is actually used for control flow, as the number of headers may be 1 in a multipart file
    /// Is this file declared to contain multiple parts?
    pub fn is_multipart(&self) -> bool {
        self.is_multipart_file
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        use ::bit_field::BitField;

        let version_and_flags = u32::read(read)?;

        // take the least significant bits, they contain the file format version number
        let version = (version_and_flags & 0x000F) as u8;

        // the 24 most significant bits are treated as a set of boolean flags
        let is_single_tile = version_and_flags.get_bit(9);
        let has_long_names = version_and_flags.get_bit(10);
        let has_deep_data = version_and_flags.get_bit(11);
        let is_multipart_file = version_and_flags.get_bit(12);

        // all remaining bits except 9, 10, 11 and 12 are reserved and should be 0.
        // a set bit there would mean a feature this library cannot decode
        let unknown_flags = version_and_flags >> 13;

        if unknown_flags != 0 {
            return Err(Error::unsupported("too new file feature flags"));
        }

        Ok(Requirements {
            file_format_version: version,
            is_single_part_and_tiled: is_single_tile,
            has_long_names, has_deep_data, is_multipart_file,
        })
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(self, write: &mut W) -> UnitResult {
        use ::bit_field::BitField;

        // the least significant bits contain the file format version number
        let mut version_and_flags = self.file_format_version as u32;

        // the 24 most significant bits are treated as a set of boolean flags
        version_and_flags.set_bit(9, self.is_single_part_and_tiled);
        version_and_flags.set_bit(10, self.has_long_names);
        version_and_flags.set_bit(11, self.has_deep_data);
        version_and_flags.set_bit(12, self.is_multipart_file);
        // all remaining bits except 9, 10, 11 and 12 are reserved and should be 0

        version_and_flags.write(write)?;
        Ok(())
    }

    /// Validate this instance.
    pub fn validate(&self) -> UnitResult {
        if self.has_deep_data {
            return Err(Error::unsupported("deep data not supported yet"));
        }

        if let 1..=2 = self.file_format_version {
            match (
                self.is_single_part_and_tiled, self.has_deep_data, self.is_multipart_file,
                self.file_format_version
            ) {
                // Single-part scan line. One normal scan line image.
                (false, false, false, 1..=2) => Ok(()),

                // Single-part tile. One normal tiled image.
                (true, false, false, 1..=2) => Ok(()),

                // Multi-part (new in 2.0).
                // Multiple normal images (scan line and/or tiled).
                (false, false, true, 2) => Ok(()),

                // Single-part deep data (new in 2.0).
                (false, true, false, 2) => Ok(()),

                // Multi-part deep data (new in 2.0).
                (false, true, true, 2) => Ok(()),

                _ => Err(Error::BadHeader("invalid file feature flags".into()))
            }
        }
        else {
            Err(Error::unsupported("file version newer than `2.0`"))
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::attribute::{
        AttributeValue, ChannelDescription, ChannelList, IntegerBounds,
        LevelMode, LineOrder, SampleType, Text, TileDescription as Tiles,
    };

    fn luma_channels() -> ChannelList {
        let mut channels = ChannelList::empty();
        channels.insert(ChannelDescription::named("Y", SampleType::F32)).unwrap();
        channels
    }

    #[test]
    fn round_trip_requirements() {
        let requirements = Requirements {
            file_format_version: 2,
            is_single_part_and_tiled: true,
            has_long_names: false,
            has_deep_data: false,
            is_multipart_file: false,
        };

        let mut data: Vec<u8> = Vec::new();
        requirements.write(&mut data).unwrap();
        let read = Requirements::read(&mut data.as_slice()).unwrap();
        assert_eq!(requirements, read);
    }

    #[test]
    fn round_trip_multipart_meta_data() {
        let mut first = Header::new(
            IntegerBounds::new(Vec2(3, -5), Vec2(2000, 333)),
            luma_channels(),
        ).with_encoding(Compression::ZIP16, LineOrder::Increasing)
            .with_name(Text::from("main"));

        first.custom_attributes.insert(
            Text::from("comments"),
            AttributeValue::Text(Text::from("a single line of text")),
        ).unwrap();

        let second = Header::new(
            IntegerBounds::from_dimensions(Vec2(321, 321)),
            luma_channels(),
        ).with_tiles(Tiles {
            tile_size: Vec2(32, 32),
            level_mode: LevelMode::Singular,
            rounding_mode: RoundingMode::Down,
        }).with_name(Text::from("depth"));

        let meta = MetaData::new(vec![first, second]);
        assert!(meta.requirements.is_multipart());

        let mut data: Vec<u8> = Vec::new();
        meta.write_validating_to_buffered(&mut data).unwrap();
        assert_eq!(meta.byte_size(), data.len());

        let decoded = MetaData::read_from_buffered(data.as_slice()).unwrap();
        assert_eq!(meta, decoded);
    }

    #[test]
    fn duplicate_part_names_fail_validation() {
        let header = Header::new(
            IntegerBounds::from_dimensions(Vec2(16, 16)),
            luma_channels(),
        ).with_name(Text::from("twin"));

        let meta = MetaData::new(vec![ header.clone(), header ]);
        assert!(meta.validate().is_err());
    }

    #[test]
    fn long_names_are_inferred_from_headers() {
        let mut header = Header::new(
            IntegerBounds::from_dimensions(Vec2(16, 16)),
            luma_channels(),
        );

        header.custom_attributes.insert(
            Text::from("a custom attribute with a rather long name"),
            AttributeValue::I32(1),
        ).unwrap();

        let meta = MetaData::new(vec![ header ]);
        assert!(meta.requirements.has_long_names);
        meta.validate().unwrap();

        // claiming short names while a long name exists must fail
        let mut lying = meta;
        lying.requirements.has_long_names = false;
        assert!(matches!(lying.validate(), Err(Error::NameTooLong(_))));
    }

    #[test]
    fn chunk_counts() {
        // scan lines: 333 rows of zip16 blocks
        assert_eq!(
            compute_chunk_count(Compression::ZIP16, Vec2(2000, 333), Blocks::ScanLines),
            21 // ceil(333 / 16)
        );

        // uncompressed scan lines are single rows
        assert_eq!(
            compute_chunk_count(Compression::Uncompressed, Vec2(2000, 333), Blocks::ScanLines),
            333
        );

        // tiles including a clipped last row and column
        assert_eq!(
            compute_chunk_count(Compression::Uncompressed, Vec2(321, 321), Blocks::Tiles(Tiles {
                tile_size: Vec2(32, 32),
                level_mode: LevelMode::Singular,
                rounding_mode: RoundingMode::Down,
            })),
            11 * 11
        );
    }

    #[test]
    fn mip_map_levels_count_and_size() {
        let levels: Vec<(usize, Vec2<usize>)> =
            mip_map_levels(RoundingMode::Down, Vec2(16, 8)).collect();

        assert_eq!(levels, vec![
            (0, Vec2(16, 8)),
            (1, Vec2(8, 4)),
            (2, Vec2(4, 2)),
            (3, Vec2(2, 1)),
            (4, Vec2(1, 1)),
        ]);
    }
}
