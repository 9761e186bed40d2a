
//! Data blocks of pixel bytes, and the pipelines that
//! turn them into chunks and back.

pub mod chunk;
pub mod decode;
pub mod encode;

use crate::error::{Error, Result, UnitResult};
use crate::math::Vec2;
use crate::meta::attribute::{ChannelList, IntegerBounds, SampleType};
use crate::meta::header::Header;
use crate::block::chunk::TileCoordinates;

pub use decode::ChunkDecoder;
pub use encode::ChunkEncoder;


/// Specifies where a block of pixel data should be placed in the actual image.
/// This is a globally unique identifier which
/// includes the part, level index, and pixel location.
#[derive(Clone, Copy, Eq, Hash, PartialEq, Debug)]
pub struct BlockIndex {

    /// Index of the part.
    pub part_index: usize,

    /// Index of the top left pixel of the block inside the data window.
    pub pixel_position: Vec2<usize>,

    /// Number of pixels in this block. Blocks on the lower or right edge
    /// of the data window may be smaller than the default block size.
    pub pixel_size: Vec2<usize>,

    /// Index of the mip or rip level in the image.
    pub level: Vec2<usize>,
}

/// The byte layout of one channel within an uncompressed block.
/// Callers use this to size and validate their own pixel buffers.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct ChannelGeometry {

    /// The type of the samples in this channel.
    pub sample_type: SampleType,

    /// Number of bytes that a single sample occupies.
    pub bytes_per_sample: usize,

    /// Number of samples per line and number of sampled lines in the block,
    /// after applying the subsampling rate of the channel.
    pub sampled_size: Vec2<usize>,

    /// The horizontal and vertical subsampling rate of this channel.
    /// `1` means every pixel has a sample.
    pub sampling: Vec2<usize>,
}

impl BlockIndex {

    /// Resolve the chunk coordinates within the specified part to a block index.
    /// Fails for coordinates outside the part.
    pub fn for_block(header: &Header, part_index: usize, coordinates: TileCoordinates) -> Result<Self> {
        let bounds = header.get_absolute_block_pixel_coordinates(coordinates)?;

        Ok(BlockIndex {
            part_index,
            pixel_position: bounds.position.to_usize("block position")?,
            pixel_size: bounds.size,
            level: coordinates.level_index,
        })
    }
}

impl ChannelGeometry {

    /// Number of bytes the samples of this channel occupy in the block.
    pub fn byte_size(&self) -> usize {
        self.sampled_size.area() * self.bytes_per_sample
    }

    /// Number of samples in one line of this channel.
    pub fn sampled_width(&self) -> usize { self.sampled_size.width() }

    /// Number of sampled lines of this channel in the block.
    pub fn sampled_height(&self) -> usize { self.sampled_size.height() }
}

/// Number of sample positions within `start .. start + count`
/// when only every `sampling`th position carries a sample.
fn sampled_count(start: usize, count: usize, sampling: usize) -> usize {
    let first = (start + sampling - 1) / sampling;
    let end = (start + count + sampling - 1) / sampling;
    end - first
}

/// The per-channel layout of an uncompressed block
/// covering the specified section of the data window.
/// Geometries appear in the stored channel order, by ascending name.
pub fn channel_geometries(channels: &ChannelList, block: IntegerBounds) -> Vec<ChannelGeometry> {
    let position = Vec2(block.position.x().max(0) as usize, block.position.y().max(0) as usize);

    channels.list.iter()
        .map(|channel| ChannelGeometry {
            sample_type: channel.sample_type,
            bytes_per_sample: channel.sample_type.bytes_per_sample(),
            sampling: channel.sampling,
            sampled_size: Vec2(
                sampled_count(position.x(), block.size.width(), channel.sampling.x()),
                sampled_count(position.y(), block.size.height(), channel.sampling.y()),
            ),
        })
        .collect()
}

/// Number of bytes of the uncompressed block covering the specified
/// section of the data window, accounting for subsampled channels.
pub fn block_byte_size(channels: &ChannelList, block: IntegerBounds) -> usize {
    channel_geometries(channels, block).iter()
        .map(ChannelGeometry::byte_size)
        .sum()
}

/// One contiguous run of sample bytes inside an uncompressed block:
/// the samples of one channel within one scan line.
#[derive(Clone, Eq, PartialEq, Debug)]
pub(crate) struct LineSection {

    /// Index of the channel in the stored channel order.
    pub channel_index: usize,

    /// Index of this line among the sampled lines of this channel, starting at zero.
    pub sampled_line_index: usize,

    /// Position of the samples in the unpacked block bytes.
    pub block_byte_range: std::ops::Range<usize>,
}

/// Walk the unpacked block layout front to back.
/// For each scan line of the block, the sampled channels appear in stored
/// order, each contributing one contiguous run of little-endian samples.
pub(crate) fn for_lines_in_block(
    channels: &ChannelList, block: IntegerBounds,
    mut for_line: impl FnMut(LineSection) -> UnitResult,
) -> UnitResult
{
    let geometry = channel_geometries(channels, block);
    let position = Vec2(block.position.x().max(0) as usize, block.position.y().max(0) as usize);

    let mut byte_position = 0;
    let mut sampled_lines = vec![0_usize; geometry.len()];

    for y in position.y() .. position.y() + block.size.height() {
        for (channel_index, channel) in geometry.iter().enumerate() {
            if y % channel.sampling.y() != 0 { continue; }

            let line_bytes = channel.sampled_width() * channel.bytes_per_sample;
            let sampled_line_index = sampled_lines[channel_index];
            sampled_lines[channel_index] += 1;

            for_line(LineSection {
                channel_index, sampled_line_index,
                block_byte_range: byte_position .. byte_position + line_bytes,
            })?;

            byte_position += line_bytes;
        }
    }

    Ok(())
}

/// Check that all stored chunk offsets point behind the offset tables
/// and into the stream. The chunks themselves are validated when read.
pub(crate) fn validate_offsets(tables: &[Vec<u64>], stream_byte_len: u64, min_chunk_offset: u64) -> UnitResult {
    for table in tables {
        for &offset in table {
            if offset < min_chunk_offset || offset >= stream_byte_len {
                return Err(Error::invalid("chunk offset table entry"));
            }
        }
    }

    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::attribute::ChannelDescription;

    fn rgb_f32() -> ChannelList {
        ChannelList::new(smallvec![
            ChannelDescription::named("R", SampleType::F32),
            ChannelDescription::named("G", SampleType::F32),
            ChannelDescription::named("B", SampleType::F32),
        ])
    }

    #[test]
    fn geometry_without_subsampling(){
        let block = IntegerBounds::new((0, 64), (64, 16));
        let geometry = channel_geometries(&rgb_f32(), block);

        assert_eq!(geometry.len(), 3);
        for channel in &geometry {
            assert_eq!(channel.sampled_size, Vec2(64, 16));
            assert_eq!(channel.bytes_per_sample, 4);
            assert_eq!(channel.byte_size(), 64 * 16 * 4);
        }

        assert_eq!(block_byte_size(&rgb_f32(), block), 3 * 64 * 16 * 4);
    }

    #[test]
    fn geometry_with_subsampling(){
        let mut chroma = ChannelDescription::named("BY", SampleType::F16);
        chroma.sampling = Vec2(2, 2);

        let luma = ChannelDescription::named("Y", SampleType::F16);
        let channels = ChannelList::new(smallvec![chroma, luma]);

        let block = IntegerBounds::new((0, 0), (7, 5));
        let geometry = channel_geometries(&channels, block);

        // stored ascending, so "BY" comes first
        assert_eq!(geometry[0].sampled_size, Vec2(4, 3));
        assert_eq!(geometry[0].sampling, Vec2(2, 2));
        assert_eq!(geometry[1].sampled_size, Vec2(7, 5));
    }

    #[test]
    fn line_sections_cover_the_block_exactly(){
        let channels = rgb_f32();
        let block = IntegerBounds::new((0, 32), (5, 2));

        let mut expected_start = 0;
        let mut count = 0;

        for_lines_in_block(&channels, block, |section| {
            assert_eq!(section.block_byte_range.start, expected_start);
            assert_eq!(section.block_byte_range.len(), 5 * 4);

            expected_start = section.block_byte_range.end;
            count += 1;
            Ok(())
        }).unwrap();

        // two lines, three channels per line
        assert_eq!(count, 6);
        assert_eq!(expected_start, block_byte_size(&channels, block));
    }
}
