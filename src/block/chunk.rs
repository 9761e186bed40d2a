
//! Read and write already compressed pixel data blocks.
//! Does not include the process of compression and decompression.

use crate::error::{Error, Result, UnitResult, i32_to_usize, usize_to_i32};
use crate::io::{Data, Read, Write};
use crate::math::Vec2;
use crate::meta::attribute::IntegerBounds;
use crate::meta::{MetaData, calculate_block_size};

/// A generic block of pixel information.
/// Contains pixel data and an index to the corresponding header.
/// All pixel data in a file is split into a list of chunks.
/// Also contains positioning information that locates this
/// data block in the part.
#[derive(Debug, Clone)]
pub struct Chunk {

    /// The part this chunk belongs to.
    /// Zero for files with only one part.
    pub part_index: usize,

    /// The compressed pixel contents.
    /// This data is compressed and in little-endian format.
    pub compressed_block: CompressedBlock,
}

/// The raw, possibly compressed pixel data of a chunk.
/// Each part in a file can have a different type of block.
/// The contained bytes are in the compressed form specified
/// by the compression attribute of the corresponding header.
#[derive(Debug, Clone)]
pub enum CompressedBlock {

    /// Scan line blocks of flat data.
    ScanLine(CompressedScanLineBlock),

    /// Tiles of flat data.
    Tile(CompressedTileBlock),
}

/// A `CompressedBlock` of flat scan lines.
#[derive(Debug, Clone)]
pub struct CompressedScanLineBlock {

    /// The y coordinate of the first scan line in this block,
    /// in the global space of the file, including the data window offset.
    pub y_coordinate: i32,

    /// The compressed pixel contents.
    pub compressed_pixels: Vec<u8>,
}

/// A `CompressedBlock` of a single flat tile.
#[derive(Debug, Clone)]
pub struct CompressedTileBlock {

    /// The tile location.
    pub coordinates: TileCoordinates,

    /// The compressed pixel contents.
    pub compressed_pixels: Vec<u8>,
}

/// Identifies a tile within a part.
/// A scan line block is addressed as a tile
/// with a horizontal index and level of zero.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct TileCoordinates {

    /// Index of the tile, not pixel position.
    pub tile_index: Vec2<usize>,

    /// Index of the mip or rip level.
    pub level_index: Vec2<usize>,
}

impl TileCoordinates {

    /// The coordinates of the highest resolution level.
    pub fn is_largest_resolution_level(&self) -> bool {
        self.level_index == Vec2(0, 0)
    }

    /// Write this tile location to the stream as four `i32` values.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        usize_to_i32(self.tile_index.x(), "tile x index")?.write(write)?;
        usize_to_i32(self.tile_index.y(), "tile y index")?.write(write)?;
        usize_to_i32(self.level_index.x(), "tile x level")?.write(write)?;
        usize_to_i32(self.level_index.y(), "tile y level")?.write(write)?;
        Ok(())
    }

    /// Read a tile location from the stream.
    pub fn read(read: &mut impl Read) -> Result<Self> {
        let tile_x = i32::read(read)?;
        let tile_y = i32::read(read)?;

        let level_x = i32::read(read)?;
        let level_y = i32::read(read)?;

        if level_x > 31 || level_y > 31 {
            // level index calculations would overflow
            return Err(Error::invalid("level index exceeding integer maximum"));
        }

        Ok(TileCoordinates {
            tile_index: Vec2(tile_x, tile_y).to_usize("tile coordinate index")?,
            level_index: Vec2(level_x, level_y).to_usize("tile coordinate level")?
        })
    }

    /// The indices which can be used to index into the arrays of a data window.
    /// These coordinates are only valid inside the corresponding one header.
    /// Errors for tile indices outside of the specified level size.
    pub fn to_data_indices(&self, tile_size: Vec2<usize>, max: Vec2<usize>) -> Result<IntegerBounds> {
        let x = self.tile_index.x() * tile_size.x();
        let y = self.tile_index.y() * tile_size.y();

        if x >= max.x() || y >= max.y() {
            Err(Error::invalid("tile index"))
        }
        else {
            Ok(IntegerBounds {
                position: Vec2(usize_to_i32(x, "tile x position")?, usize_to_i32(y, "tile y position")?),
                size: Vec2(
                    calculate_block_size(max.x(), tile_size.x(), x)?,
                    calculate_block_size(max.y(), tile_size.y(), y)?,
                ),
            })
        }
    }

    /// Absolute coordinates inside the global 2D space of a file, may be negative.
    pub fn to_absolute_indices(&self, tile_size: Vec2<usize>, data_window: IntegerBounds) -> Result<IntegerBounds> {
        let data = self.to_data_indices(tile_size, data_window.size)?;

        Ok(IntegerBounds {
            position: data.position + data_window.position,
            size: data.size,
        })
    }
}


impl CompressedScanLineBlock {

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        self.y_coordinate.write(write)?;
        u8::write_i32_sized_slice(write, &self.compressed_pixels)?;
        Ok(())
    }

    /// Read the value without validating.
    /// A valid file never declares a payload larger than the uncompressed
    /// block, because a block is stored raw whenever compression would grow it.
    pub fn read(read: &mut impl Read, max_block_byte_size: usize) -> Result<Self> {
        let y_coordinate = i32::read(read)?;

        let compressed_pixels = u8::read_i32_sized_vec(
            read, max_block_byte_size,
            Some(max_block_byte_size), "scan line block pixel size",
        )?;

        Ok(CompressedScanLineBlock { y_coordinate, compressed_pixels })
    }
}

impl CompressedTileBlock {

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        self.coordinates.write(write)?;
        u8::write_i32_sized_slice(write, &self.compressed_pixels)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read(read: &mut impl Read, max_block_byte_size: usize) -> Result<Self> {
        let coordinates = TileCoordinates::read(read)?;

        let compressed_pixels = u8::read_i32_sized_vec(
            read, max_block_byte_size,
            Some(max_block_byte_size), "tile block pixel size",
        )?;

        Ok(CompressedTileBlock { coordinates, compressed_pixels })
    }
}

impl Chunk {

    /// Without validation, write this instance to the byte stream.
    /// The part index is only written for files with multiple parts.
    pub fn write<W: Write>(&self, write: &mut W, header_count: usize) -> UnitResult {
        debug_assert!(self.part_index < header_count, "part index out of range");

        if header_count != 1 {
            usize_to_i32(self.part_index, "chunk part index")?.write(write)?;
        }

        match &self.compressed_block {
            CompressedBlock::ScanLine(block) => block.write(write),
            CompressedBlock::Tile(block) => block.write(write),
        }
    }

    /// Read the value without validating.
    pub fn read(read: &mut impl Read, meta_data: &MetaData) -> Result<Self> {
        let part_index = {
            if meta_data.requirements.is_multipart() {
                let index = i32_to_usize(i32::read(read)?, "chunk part index")?;

                if index >= meta_data.headers.len() {
                    return Err(Error::invalid("chunk part index"));
                }

                index
            }
            else { 0 }
        };

        let header = &meta_data.headers[part_index];
        let max_block_byte_size = header.max_block_byte_size();

        if header.deep {
            return Err(Error::unsupported("deep data not supported yet"));
        }

        let compressed_block = {
            if header.has_tiles() {
                CompressedBlock::Tile(CompressedTileBlock::read(read, max_block_byte_size)?)
            }
            else {
                CompressedBlock::ScanLine(CompressedScanLineBlock::read(read, max_block_byte_size)?)
            }
        };

        Ok(Chunk { part_index, compressed_block })
    }

    /// Number of bytes this chunk occupies in a file.
    /// The part index is only stored for files with multiple parts.
    pub fn byte_size(&self, header_count: usize) -> usize {
        let part_number_size = if header_count != 1 { i32::BYTE_SIZE } else { 0 };

        let block_size = match &self.compressed_block {
            CompressedBlock::ScanLine(block) =>
                i32::BYTE_SIZE + i32::BYTE_SIZE + block.compressed_pixels.len(),

            CompressedBlock::Tile(block) =>
                4 * i32::BYTE_SIZE + i32::BYTE_SIZE + block.compressed_pixels.len(),
        };

        part_number_size + block_size
    }
}
