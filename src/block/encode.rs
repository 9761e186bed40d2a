
//! Gather caller-provided channel buffers into blocks,
//! compress them, and write them to an open file.

use crate::block::chunk::{
    Chunk, CompressedBlock, CompressedScanLineBlock, CompressedTileBlock, TileCoordinates,
};
use crate::block::{ChannelGeometry, block_byte_size, channel_geometries, for_lines_in_block};
use crate::compression::ByteVec;
use crate::context::{WriteContext, scan_line_coordinates, tile_coordinates};
use crate::error::{Error, Result, UnitResult};
use crate::io::WriteAt;
use crate::math::Vec2;
use crate::meta::attribute::{ChannelList, IntegerBounds};
use crate::meta::header::Header;


/// One caller-provided buffer holding the samples of one channel.
///
/// The encoder reads the sample bytes of each pixel from
/// `pixel_index * pixel_stride` within each line, and each sampled line
/// from `line_index * line_stride`. Strides are in bytes, so interleaved
/// and planar layouts can both be passed directly.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSource<'b> {

    /// The samples of one channel, in little endian byte order.
    pub buffer: &'b [u8],

    /// Offset in bytes between the first bytes of two consecutive samples.
    pub pixel_stride: usize,

    /// Offset in bytes between the first bytes of two consecutive sampled lines.
    pub line_stride: usize,
}

/// Encodes chunks of one part into an open write context.
///
/// The encoder borrows the write context immutably, so every thread can
/// have its own encoder, and all of them may write chunks at the same
/// time. The gather buffer is reused across chunks of this encoder.
#[derive(Debug)]
pub struct ChunkEncoder<'c, W> {
    context: &'c WriteContext<W>,
    part_index: usize,

    gather_buffer: ByteVec,
}

impl<'c, W: WriteAt> ChunkEncoder<'c, W> {

    pub(crate) fn new(context: &'c WriteContext<W>, part_index: usize) -> Self {
        ChunkEncoder { context, part_index, gather_buffer: Vec::new() }
    }

    fn header(&self) -> Result<&'c Header> {
        self.context.committed_header(self.part_index)
    }

    /// The per-channel buffer layout of the block at the specified coordinates.
    /// Use this to validate the channel source buffers.
    pub fn channel_geometries(&self, coordinates: TileCoordinates) -> Result<Vec<ChannelGeometry>> {
        let header = self.header()?;
        let block = header.get_absolute_block_pixel_coordinates(coordinates)?;
        Ok(channel_geometries(&header.channels, block))
    }

    /// Encode the tile at the specified location from the channel buffers.
    /// One source must be provided per channel, in stored channel order.
    /// Fails with the mixed-api error if this part stores scan lines.
    pub fn encode_tile(
        &mut self, tile_index: Vec2<usize>, level_index: Vec2<usize>,
        sources: &[ChannelSource<'_>],
    ) -> UnitResult {
        let coordinates = tile_coordinates(self.header()?, tile_index, level_index)?;
        self.encode_chunk(coordinates, sources)
    }

    /// Encode the scan line block containing the specified y coordinate.
    /// One source must be provided per channel, in stored channel order.
    /// Fails with the mixed-api error if this part stores tiles.
    pub fn encode_scan_line_block(&mut self, y_coordinate: i32, sources: &[ChannelSource<'_>]) -> UnitResult {
        let coordinates = scan_line_coordinates(self.header()?, y_coordinate)?;
        self.encode_chunk(coordinates, sources)
    }

    /// Encode the chunk at the specified coordinates from the channel buffers.
    ///
    /// Gathers the strided channel bytes into the contiguous block form,
    /// compresses them, and hands the result to the context, which reserves
    /// a byte range, issues one positioned write, and records the offset
    /// under the logical chunk index.
    pub fn encode_chunk(&mut self, coordinates: TileCoordinates, sources: &[ChannelSource<'_>]) -> UnitResult {
        let header = self.header()?;

        if sources.len() != header.channels.list.len() {
            return Err(Error::ArgumentOutOfRange("one channel buffer per channel is required".into()));
        }

        let chunk_index = header.chunk_index_of(coordinates)?;
        let block = header.get_absolute_block_pixel_coordinates(coordinates)?;

        self.gather_buffer.clear();
        self.gather_buffer.resize(block_byte_size(&header.channels, block), 0);
        gather_block(&header.channels, block, sources, &mut self.gather_buffer)?;

        let compressed_pixels = header.compression.compress_block(&self.gather_buffer)?;

        let compressed_block = {
            if header.has_tiles() {
                CompressedBlock::Tile(CompressedTileBlock { coordinates, compressed_pixels })
            }
            else {
                CompressedBlock::ScanLine(CompressedScanLineBlock {
                    y_coordinate: header.data_window.position.y() + block.position.y(),
                    compressed_pixels,
                })
            }
        };

        let header_count = self.context.meta_data()?.headers.len();
        let chunk = Chunk { part_index: self.part_index, compressed_block };

        let mut bytes = Vec::with_capacity(chunk.byte_size(header_count));
        chunk.write(&mut bytes, header_count)?;

        self.context.write_chunk_bytes(self.part_index, chunk_index, &bytes)
    }
}

/// Collect the per-channel buffers into the contiguous block form:
/// for each line, for each sampled channel, the samples of that line.
fn gather_block(channels: &ChannelList, block: IntegerBounds, sources: &[ChannelSource<'_>], gathered: &mut [u8]) -> UnitResult {
    let geometry = channel_geometries(channels, block);

    for_lines_in_block(channels, block, |section| {
        let bytes_per_sample = geometry[section.channel_index].bytes_per_sample;
        let source = &sources[section.channel_index];

        let destination = gathered.get_mut(section.block_byte_range.clone())
            .ok_or_else(|| Error::invalid("block byte count"))?;

        let line_start = section.sampled_line_index * source.line_stride;

        if source.pixel_stride == bytes_per_sample {
            // the samples of this line are contiguous in the source
            let line = source.buffer.get(line_start .. line_start + destination.len())
                .ok_or_else(|| Error::invalid("channel buffer too small"))?;

            destination.copy_from_slice(line);
        }
        else {
            for (sample_index, sample) in destination.chunks_exact_mut(bytes_per_sample).enumerate() {
                let sample_start = line_start + sample_index * source.pixel_stride;

                let bytes = source.buffer.get(sample_start .. sample_start + bytes_per_sample)
                    .ok_or_else(|| Error::invalid("channel buffer too small"))?;

                sample.copy_from_slice(bytes);
            }
        }

        Ok(())
    })
}
