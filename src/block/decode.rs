
//! Read chunks from an open file and decompress them
//! into caller-provided channel buffers.

use crate::block::chunk::{Chunk, CompressedBlock, TileCoordinates};
use crate::block::{ChannelGeometry, block_byte_size, channel_geometries, for_lines_in_block};
use crate::compression::{ByteVec, Compression};
use crate::context::{ReadContext, scan_line_coordinates, tile_coordinates};
use crate::error::{Error, Result, UnitResult};
use crate::io::{ReadAt, StreamReader};
use crate::math::Vec2;
use crate::meta::attribute::ChannelList;
use crate::meta::attribute::IntegerBounds;
use crate::meta::header::Header;


/// One caller-provided buffer that receives the samples of one channel.
///
/// The decoder writes the sample bytes of each decoded pixel to
/// `pixel_index * pixel_stride` within each line, and each sampled line to
/// `line_index * line_stride`. Strides are in bytes, so interleaved and
/// planar layouts can both be filled directly.
#[derive(Debug)]
pub struct ChannelTarget<'b> {

    /// Receives the decoded samples of one channel.
    pub buffer: &'b mut [u8],

    /// Offset in bytes between the first bytes of two consecutive samples.
    pub pixel_stride: usize,

    /// Offset in bytes between the first bytes of two consecutive sampled lines.
    pub line_stride: usize,
}

/// Decodes the chunks of one part of an open file.
///
/// The decoder borrows the read context immutably, so every thread can
/// have its own decoder, and all of them may run at the same time.
/// The scratch buffers of the previous decode can be inspected, mainly to
/// observe that uncompressed chunks travel from the stream to the caller
/// buffers without any intermediate buffer.
#[derive(Debug)]
pub struct ChunkDecoder<'c, R> {
    context: &'c ReadContext<R>,
    part_index: usize,

    packed_scratch: Option<ByteVec>,
    unpacked_scratch: Option<ByteVec>,
}

impl<'c, R: ReadAt> ChunkDecoder<'c, R> {

    pub(crate) fn new(context: &'c ReadContext<R>, part_index: usize) -> Self {
        ChunkDecoder { context, part_index, packed_scratch: None, unpacked_scratch: None }
    }

    /// The header of the part this decoder reads from.
    pub fn header(&self) -> &Header {
        &self.context.headers()[self.part_index]
    }

    /// The per-channel buffer layout of the block at the specified coordinates.
    /// Use this to size the channel target buffers.
    pub fn channel_geometries(&self, coordinates: TileCoordinates) -> Result<Vec<ChannelGeometry>> {
        let header = self.header();
        let block = header.get_absolute_block_pixel_coordinates(coordinates)?;
        Ok(channel_geometries(&header.channels, block))
    }

    /// Decode the tile at the specified location into the channel buffers.
    /// One target must be provided per channel, in stored channel order.
    /// Fails with the mixed-api error if this part stores scan lines.
    pub fn decode_tile(
        &mut self, tile_index: Vec2<usize>, level_index: Vec2<usize>,
        targets: &mut [ChannelTarget<'_>],
    ) -> UnitResult {
        let coordinates = tile_coordinates(self.header(), tile_index, level_index)?;
        self.decode_chunk(coordinates, targets)
    }

    /// Decode the scan line block containing the specified y coordinate.
    /// One target must be provided per channel, in stored channel order.
    /// Fails with the mixed-api error if this part stores tiles.
    pub fn decode_scan_line_block(&mut self, y_coordinate: i32, targets: &mut [ChannelTarget<'_>]) -> UnitResult {
        let coordinates = scan_line_coordinates(self.header(), y_coordinate)?;
        self.decode_chunk(coordinates, targets)
    }

    /// Decode the chunk at the specified coordinates into the channel buffers.
    ///
    /// Resolves the coordinates to the offset table entry, issues one
    /// positioned read, decompresses if necessary, and scatters the sample
    /// bytes into the targets, honoring their strides.
    pub fn decode_chunk(&mut self, coordinates: TileCoordinates, targets: &mut [ChannelTarget<'_>]) -> UnitResult {
        self.packed_scratch = None;
        self.unpacked_scratch = None;

        // borrow the header from the context rather than from self,
        // so the scratch fields can be reassigned below
        let context = self.context;
        let header = &context.headers()[self.part_index];

        if targets.len() != header.channels.list.len() {
            return Err(Error::ArgumentOutOfRange("one channel buffer per channel is required".into()));
        }

        let chunk_index = header.chunk_index_of(coordinates)?;
        let offset = context.chunk_offset(self.part_index, chunk_index)?;

        let mut read = StreamReader::starting_at(context.stream(), offset);
        let chunk = Chunk::read(&mut read, context.meta_data())?;

        if chunk.part_index != self.part_index {
            return Err(Error::invalid("chunk offset table entry"));
        }

        let block = header.get_absolute_block_pixel_coordinates(coordinates)?;
        let payload = validate_chunk_position(chunk, header, block, coordinates)?;
        let expected_byte_size = block_byte_size(&header.channels, block);

        if header.compression == Compression::Uncompressed {
            // hand the raw bytes straight to the caller buffers,
            // skipping the scratch buffers entirely
            if payload.len() != expected_byte_size {
                return Err(Error::invalid("uncompressed block byte count"));
            }

            scatter_block(&header.channels, block, &payload, targets)
        }
        else {
            let unpacked = header.compression.decompress_block(&payload, expected_byte_size)?;
            scatter_block(&header.channels, block, &unpacked, targets)?;

            self.packed_scratch = Some(payload);
            self.unpacked_scratch = Some(unpacked);
            Ok(())
        }
    }

    /// The compressed bytes of the most recent decode,
    /// or none if the chunk was stored uncompressed.
    pub fn packed_scratch(&self) -> Option<&[u8]> {
        self.packed_scratch.as_deref()
    }

    /// The decompressed bytes of the most recent decode,
    /// or none if the chunk was stored uncompressed.
    pub fn unpacked_scratch(&self) -> Option<&[u8]> {
        self.unpacked_scratch.as_deref()
    }
}

/// Check that the chunk found at the offset actually stores the requested
/// block, then return its compressed payload.
fn validate_chunk_position(chunk: Chunk, header: &Header, block: IntegerBounds, coordinates: TileCoordinates) -> Result<ByteVec> {
    match chunk.compressed_block {
        CompressedBlock::Tile(tile) => {
            if tile.coordinates != coordinates {
                return Err(Error::invalid("chunk tile coordinates"));
            }

            Ok(tile.compressed_pixels)
        }

        CompressedBlock::ScanLine(scan_lines) => {
            let expected_y = header.data_window.position.y() + block.position.y();
            if scan_lines.y_coordinate != expected_y {
                return Err(Error::invalid("chunk scan line coordinate"));
            }

            Ok(scan_lines.compressed_pixels)
        }
    }
}

/// Distribute the unpacked block bytes over the per-channel buffers,
/// converting the interleaved-by-line block layout into the caller layout.
fn scatter_block(channels: &ChannelList, block: IntegerBounds, unpacked: &[u8], targets: &mut [ChannelTarget<'_>]) -> UnitResult {
    let geometry = channel_geometries(channels, block);

    for_lines_in_block(channels, block, |section| {
        let bytes_per_sample = geometry[section.channel_index].bytes_per_sample;
        let target = &mut targets[section.channel_index];

        let source = unpacked.get(section.block_byte_range.clone())
            .ok_or_else(|| Error::invalid("block byte count"))?;

        let line_start = section.sampled_line_index * target.line_stride;

        if target.pixel_stride == bytes_per_sample {
            // the samples of this line are contiguous in the target
            target.buffer.get_mut(line_start .. line_start + source.len())
                .ok_or_else(|| Error::invalid("channel buffer too small"))?
                .copy_from_slice(source);
        }
        else {
            for (sample_index, sample) in source.chunks_exact(bytes_per_sample).enumerate() {
                let sample_start = line_start + sample_index * target.pixel_stride;

                target.buffer.get_mut(sample_start .. sample_start + bytes_per_sample)
                    .ok_or_else(|| Error::invalid("channel buffer too small"))?
                    .copy_from_slice(sample);
            }
        }

        Ok(())
    })
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::attribute::{ChannelDescription, SampleType};

    fn luma_channels() -> ChannelList {
        ChannelList::new(smallvec![
            ChannelDescription::named("Y", SampleType::U32),
        ])
    }

    #[test]
    fn scatter_with_planar_layout(){
        let channels = luma_channels();
        let block = IntegerBounds::from_dimensions((2, 2));
        let unpacked: Vec<u8> = (0 .. 16).collect();

        let mut buffer = vec![0_u8; 16];
        let mut targets = [ ChannelTarget { buffer: &mut buffer, pixel_stride: 4, line_stride: 8 } ];

        scatter_block(&channels, block, &unpacked, &mut targets).unwrap();
        assert_eq!(buffer, unpacked);
    }

    #[test]
    fn scatter_with_strided_layout(){
        let channels = luma_channels();
        let block = IntegerBounds::from_dimensions((2, 1));
        let unpacked: Vec<u8> = (0 .. 8).collect();

        // leave a 4 byte gap after every sample
        let mut buffer = vec![0xff_u8; 16];
        let mut targets = [ ChannelTarget { buffer: &mut buffer, pixel_stride: 8, line_stride: 16 } ];

        scatter_block(&channels, block, &unpacked, &mut targets).unwrap();

        assert_eq!(&buffer[0 .. 4], &[0, 1, 2, 3]);
        assert_eq!(&buffer[4 .. 8], &[0xff; 4]);
        assert_eq!(&buffer[8 .. 12], &[4, 5, 6, 7]);
    }

    #[test]
    fn scatter_into_short_buffer_fails(){
        let channels = luma_channels();
        let block = IntegerBounds::from_dimensions((2, 2));
        let unpacked: Vec<u8> = (0 .. 16).collect();

        let mut buffer = vec![0_u8; 12]; // one sample short
        let mut targets = [ ChannelTarget { buffer: &mut buffer, pixel_stride: 4, line_stride: 8 } ];

        assert!(scatter_block(&channels, block, &unpacked, &mut targets).is_err());
    }
}
