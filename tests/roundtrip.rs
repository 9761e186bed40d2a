
//! Whole-file tests: define parts, encode every chunk,
//! then open the written bytes and decode everything back.

extern crate exr_core;

use exr_core::prelude::*;
use exr_core::block::ChunkDecoder;
use exr_core::block::ChunkEncoder;
use exr_core::block::decode::ChannelTarget;
use exr_core::block::encode::ChannelSource;
use exr_core::io::SharedCursor;
use exr_core::math::RoundingMode;

use rayon::prelude::*;
use std::io::Cursor;

type MemoryStream = SharedCursor<Cursor<Vec<u8>>>;

fn memory_stream() -> MemoryStream {
    SharedCursor::new(Cursor::new(Vec::new()))
}

fn luma_channels() -> ChannelList {
    ChannelList::new(smallvec::smallvec![
        ChannelDescription::named("Y", SampleType::F32),
    ])
}

fn rgb_channels() -> ChannelList {
    ChannelList::new(smallvec::smallvec![
        ChannelDescription::named("R", SampleType::F32),
        ChannelDescription::named("G", SampleType::F32),
        ChannelDescription::named("B", SampleType::F32),
    ])
}

fn singular_tiles(size: usize) -> TileDescription {
    TileDescription {
        tile_size: Vec2(size, size),
        level_mode: LevelMode::Singular,
        rounding_mode: RoundingMode::Down,
    }
}

/// Deterministic f32 samples for one channel of one block,
/// derived from the absolute pixel position.
fn sample_bytes(block: IntegerBounds, channel_index: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(block.size.area() * 4);

    for y in 0 .. block.size.height() {
        for x in 0 .. block.size.width() {
            let value = (block.position.x() + x as i32) as f32
                + (block.position.y() + y as i32) as f32 * 1000.0
                + channel_index as f32 * 0.25;

            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }

    bytes
}

fn encode_one_chunk(header: &Header, encoder: &mut ChunkEncoder<'_, MemoryStream>, coordinates: TileCoordinates) {
    let block = header.get_absolute_block_pixel_coordinates(coordinates).unwrap();
    let line_stride = block.size.width() * 4;

    let buffers: Vec<Vec<u8>> = (0 .. header.channels.list.len())
        .map(|channel_index| sample_bytes(block, channel_index))
        .collect();

    let sources: Vec<ChannelSource<'_>> = buffers.iter()
        .map(|buffer| ChannelSource { buffer, pixel_stride: 4, line_stride })
        .collect();

    encoder.encode_chunk(coordinates, &sources).unwrap();
}

fn encode_all_chunks(context: &WriteContext<MemoryStream>, part_index: usize) {
    let header = &context.meta_data().unwrap().headers[part_index];
    let mut encoder = context.chunk_encoder(part_index).unwrap();

    for block in header.blocks_increasing_y_order() {
        encode_one_chunk(header, &mut encoder, block.location);
    }
}

fn decode_one_chunk(header: &Header, decoder: &mut ChunkDecoder<'_, MemoryStream>, coordinates: TileCoordinates) -> Vec<Vec<u8>> {
    let block = header.get_absolute_block_pixel_coordinates(coordinates).unwrap();
    let line_stride = block.size.width() * 4;

    let mut buffers: Vec<Vec<u8>> = (0 .. header.channels.list.len())
        .map(|_| vec![0_u8; block.size.area() * 4])
        .collect();

    let mut targets: Vec<ChannelTarget<'_>> = buffers.iter_mut()
        .map(|buffer| ChannelTarget { buffer, pixel_stride: 4, line_stride })
        .collect();

    decoder.decode_chunk(coordinates, &mut targets).unwrap();
    buffers
}

fn decode_and_verify_all_chunks(context: &ReadContext<MemoryStream>, part_index: usize) {
    let header = &context.headers()[part_index];
    let mut decoder = context.chunk_decoder(part_index).unwrap();

    for block in header.blocks_increasing_y_order() {
        let bounds = header.get_absolute_block_pixel_coordinates(block.location).unwrap();
        let decoded = decode_one_chunk(header, &mut decoder, block.location);

        for (channel_index, buffer) in decoded.iter().enumerate() {
            assert_eq!(
                buffer, &sample_bytes(bounds, channel_index),
                "channel {} of chunk {:?} of part {} was decoded incorrectly",
                channel_index, block.location, part_index
            );
        }
    }
}


#[test]
fn scan_line_zip_roundtrip(){
    let mut context = WriteContext::new(memory_stream());

    context.add_part(
        PartDefinition::scan_lines(IntegerBounds::from_dimensions((64, 40)), rgb_channels())
            .with_compression(Compression::ZIP16)
    ).unwrap();

    context.write_header().unwrap();

    // 40 lines at 16 lines per block
    assert_eq!(context.meta_data().unwrap().headers[0].chunk_count, 3);

    encode_all_chunks(&context, 0);
    let stream = context.finish().unwrap();

    let read = ReadContext::read_from(stream).unwrap();
    assert_eq!(read.part_count(), 1);
    assert_eq!(read.headers()[0].compression, Compression::ZIP16);
    assert_eq!(read.offset_table(0).unwrap().len(), 3);

    decode_and_verify_all_chunks(&read, 0);
}

#[test]
fn scan_line_chunks_can_be_addressed_by_y_coordinate(){
    let mut context = WriteContext::new(memory_stream());

    context.add_part(
        PartDefinition::scan_lines(IntegerBounds::from_dimensions((8, 40)), luma_channels())
            .with_compression(Compression::ZIP16)
    ).unwrap();

    context.write_header().unwrap();

    {
        let header = &context.meta_data().unwrap().headers[0];
        let mut encoder = context.chunk_encoder(0).unwrap();

        for block in header.blocks_increasing_y_order() {
            let bounds = header.get_absolute_block_pixel_coordinates(block.location).unwrap();
            let buffer = sample_bytes(bounds, 0);

            // address the block by any of its absolute scan line coordinates
            encoder.encode_scan_line_block(bounds.position.y() + 1, &[
                ChannelSource { buffer: &buffer, pixel_stride: 4, line_stride: 8 * 4 }
            ]).unwrap();
        }
    }

    let read = ReadContext::read_from(context.finish().unwrap()).unwrap();
    let header = &read.headers()[0];
    let mut decoder = read.chunk_decoder(0).unwrap();

    for block in header.blocks_increasing_y_order() {
        let bounds = header.get_absolute_block_pixel_coordinates(block.location).unwrap();
        let mut buffer = vec![0_u8; bounds.size.area() * 4];

        decoder.decode_scan_line_block(bounds.position.y(), &mut [
            ChannelTarget { buffer: &mut buffer, pixel_stride: 4, line_stride: 8 * 4 }
        ]).unwrap();

        assert_eq!(buffer, sample_bytes(bounds, 0));
    }
}

#[test]
fn tiled_rle_roundtrip_clips_edge_tiles(){
    let mut context = WriteContext::new(memory_stream());

    context.add_part(
        PartDefinition::tiled(IntegerBounds::from_dimensions((321, 321)), luma_channels())
            .with_tiles(singular_tiles(32)).unwrap()
            .with_compression(Compression::RLE)
    ).unwrap();

    context.write_header().unwrap();

    // 11 columns by 11 rows of tiles, the last column and row one pixel wide
    let header = context.meta_data().unwrap().headers[0].clone();
    assert_eq!(header.chunk_count, 121);
    assert_eq!(header.blocks_increasing_y_order().last().unwrap().size, Vec2(1, 1));

    encode_all_chunks(&context, 0);
    let read = ReadContext::read_from(context.finish().unwrap()).unwrap();

    decode_and_verify_all_chunks(&read, 0);
}

#[test]
fn multi_part_roundtrip(){
    let mut context = WriteContext::new(memory_stream());

    context.add_part(
        PartDefinition::scan_lines(IntegerBounds::from_dimensions((32, 20)), rgb_channels())
            .with_name(Text::new_or_panic("color"))
    ).unwrap();

    context.add_part(
        PartDefinition::tiled(IntegerBounds::from_dimensions((48, 48)), luma_channels())
            .with_tiles(singular_tiles(16)).unwrap()
            .with_compression(Compression::ZIP16)
            .with_name(Text::new_or_panic("depth"))
    ).unwrap();

    context.write_header().unwrap();
    assert!(context.meta_data().unwrap().requirements.is_multipart());

    encode_all_chunks(&context, 0);
    encode_all_chunks(&context, 1);

    let read = ReadContext::read_from(context.finish().unwrap()).unwrap();
    assert_eq!(read.part_count(), 2);
    assert_eq!(read.headers()[0].name, Some(Text::new_or_panic("color")));
    assert_eq!(read.headers()[1].name, Some(Text::new_or_panic("depth")));

    decode_and_verify_all_chunks(&read, 0);
    decode_and_verify_all_chunks(&read, 1);
}

#[test]
fn uncompressed_chunks_bypass_the_scratch_buffers(){
    let mut context = WriteContext::new(memory_stream());

    context.add_part(PartDefinition::scan_lines(
        IntegerBounds::from_dimensions((8, 4)), luma_channels()
    )).unwrap();

    context.write_header().unwrap();
    encode_all_chunks(&context, 0);

    let read = ReadContext::read_from(context.finish().unwrap()).unwrap();
    let header = &read.headers()[0];
    let mut decoder = read.chunk_decoder(0).unwrap();

    let first = header.blocks_increasing_y_order().next().unwrap();
    decode_one_chunk(header, &mut decoder, first.location);

    assert!(decoder.packed_scratch().is_none());
    assert!(decoder.unpacked_scratch().is_none());
}

#[test]
fn compressed_chunks_pass_through_the_scratch_buffers(){
    let mut context = WriteContext::new(memory_stream());

    context.add_part(
        PartDefinition::scan_lines(IntegerBounds::from_dimensions((64, 16)), luma_channels())
            .with_compression(Compression::ZIP16)
    ).unwrap();

    context.write_header().unwrap();
    encode_all_chunks(&context, 0);

    let read = ReadContext::read_from(context.finish().unwrap()).unwrap();
    let header = &read.headers()[0];
    let mut decoder = read.chunk_decoder(0).unwrap();

    let first = header.blocks_increasing_y_order().next().unwrap();
    let bounds = header.get_absolute_block_pixel_coordinates(first.location).unwrap();
    decode_one_chunk(header, &mut decoder, first.location);

    let unpacked = decoder.unpacked_scratch().expect("decompressed scratch should be kept");
    assert_eq!(unpacked.len(), bounds.size.area() * 4);
    assert!(decoder.packed_scratch().is_some());
}

#[test]
fn concurrent_decode_matches_sequential_decode(){
    let mut context = WriteContext::new(memory_stream());

    context.add_part(
        PartDefinition::tiled(IntegerBounds::from_dimensions((100, 100)), rgb_channels())
            .with_tiles(singular_tiles(16)).unwrap()
            .with_compression(Compression::ZIP16)
    ).unwrap();

    context.write_header().unwrap();
    encode_all_chunks(&context, 0);

    let read = ReadContext::read_from(context.finish().unwrap()).unwrap();
    let header = &read.headers()[0];
    let blocks: Vec<_> = header.blocks_increasing_y_order().collect();

    // every thread owns a decoder, all of them share the context
    blocks.par_iter().for_each(|block| {
        let mut decoder = read.chunk_decoder(0).unwrap();
        let bounds = header.get_absolute_block_pixel_coordinates(block.location).unwrap();
        let decoded = decode_one_chunk(header, &mut decoder, block.location);

        for (channel_index, buffer) in decoded.iter().enumerate() {
            assert_eq!(buffer, &sample_bytes(bounds, channel_index));
        }
    });
}

#[test]
fn concurrent_encode_produces_a_complete_file(){
    let mut context = WriteContext::new(memory_stream());

    context.add_part(
        PartDefinition::scan_lines(IntegerBounds::from_dimensions((64, 200)), luma_channels())
            .with_compression(Compression::RLE)
    ).unwrap();

    context.write_header().unwrap();

    let header = context.meta_data().unwrap().headers[0].clone();
    let blocks: Vec<_> = header.blocks_increasing_y_order().collect();

    // chunks of one part may be written from any thread, in any order
    blocks.par_iter().for_each(|block| {
        let mut encoder = context.chunk_encoder(0).unwrap();
        encode_one_chunk(&header, &mut encoder, block.location);
    });

    let read = ReadContext::read_from(context.finish().unwrap()).unwrap();

    // every chunk got its own offset
    let mut offsets = read.offset_table(0).unwrap().clone();
    offsets.sort_unstable();
    offsets.dedup();
    assert_eq!(offsets.len(), blocks.len());

    decode_and_verify_all_chunks(&read, 0);
}

#[test]
fn parts_must_be_completed_in_index_order(){
    let mut context = WriteContext::new(memory_stream());

    context.add_part(
        PartDefinition::scan_lines(IntegerBounds::from_dimensions((8, 4)), luma_channels())
            .with_name(Text::new_or_panic("first"))
    ).unwrap();

    context.add_part(
        PartDefinition::scan_lines(IntegerBounds::from_dimensions((8, 4)), luma_channels())
            .with_name(Text::new_or_panic("second"))
    ).unwrap();

    context.write_header().unwrap();

    let header = context.meta_data().unwrap().headers[1].clone();
    let coordinates = header.blocks_increasing_y_order().next().unwrap().location;
    let bounds = header.get_absolute_block_pixel_coordinates(coordinates).unwrap();
    let buffer = sample_bytes(bounds, 0);

    let mut encoder = context.chunk_encoder(1).unwrap();
    let result = encoder.encode_chunk(coordinates, &[
        ChannelSource { buffer: &buffer, pixel_stride: 4, line_stride: 8 * 4 }
    ]);

    assert!(matches!(result, Err(Error::ArgumentOutOfRange(_))));

    // completing the first part unlocks the second
    encode_all_chunks(&context, 0);
    encode_all_chunks(&context, 1);
    context.finish().unwrap();
}

#[test]
fn writing_a_chunk_twice_is_rejected(){
    let mut context = WriteContext::new(memory_stream());

    context.add_part(PartDefinition::scan_lines(
        IntegerBounds::from_dimensions((8, 40)), luma_channels()
    )).unwrap();

    context.write_header().unwrap();

    let header = context.meta_data().unwrap().headers[0].clone();
    let coordinates = header.blocks_increasing_y_order().next().unwrap().location;
    let bounds = header.get_absolute_block_pixel_coordinates(coordinates).unwrap();
    let buffer = sample_bytes(bounds, 0);

    let sources = [ ChannelSource { buffer: &buffer, pixel_stride: 4, line_stride: 8 * 4 } ];

    let mut encoder = context.chunk_encoder(0).unwrap();
    encoder.encode_chunk(coordinates, &sources).unwrap();

    let again = encoder.encode_chunk(coordinates, &sources);
    assert!(matches!(again, Err(Error::Invalid(_))));
}

#[test]
fn finishing_with_missing_chunks_is_rejected(){
    let mut context = WriteContext::new(memory_stream());

    context.add_part(PartDefinition::scan_lines(
        IntegerBounds::from_dimensions((8, 40)), luma_channels()
    )).unwrap();

    context.write_header().unwrap();

    let header = context.meta_data().unwrap().headers[0].clone();
    let coordinates = header.blocks_increasing_y_order().next().unwrap().location;
    let bounds = header.get_absolute_block_pixel_coordinates(coordinates).unwrap();
    let buffer = sample_bytes(bounds, 0);

    let mut encoder = context.chunk_encoder(0).unwrap();
    encoder.encode_chunk(coordinates, &[
        ChannelSource { buffer: &buffer, pixel_stride: 4, line_stride: 8 * 4 }
    ]).unwrap();

    // only one of the forty chunks was written
    assert!(matches!(context.finish(), Err(Error::Invalid(_))));
}

#[test]
fn mixed_chunk_apis_are_rejected(){
    let mut scan_lines = WriteContext::new(memory_stream());
    scan_lines.add_part(PartDefinition::scan_lines(
        IntegerBounds::from_dimensions((8, 4)), luma_channels()
    )).unwrap();

    scan_lines.write_header().unwrap();
    encode_all_chunks(&scan_lines, 0);

    let read = ReadContext::read_from(scan_lines.finish().unwrap()).unwrap();
    let mut decoder = read.chunk_decoder(0).unwrap();
    let mut buffer = vec![0_u8; 8 * 4 * 4];

    let result = decoder.decode_tile(Vec2(0, 0), Vec2(0, 0), &mut [
        ChannelTarget { buffer: &mut buffer, pixel_stride: 4, line_stride: 8 * 4 }
    ]);
    assert!(matches!(result, Err(Error::TileApiOnScanLinePart)));


    let mut tiled = WriteContext::new(memory_stream());
    tiled.add_part(
        PartDefinition::tiled(IntegerBounds::from_dimensions((8, 8)), luma_channels())
            .with_tiles(singular_tiles(8)).unwrap()
    ).unwrap();

    tiled.write_header().unwrap();
    encode_all_chunks(&tiled, 0);

    let read = ReadContext::read_from(tiled.finish().unwrap()).unwrap();
    let mut decoder = read.chunk_decoder(0).unwrap();
    let mut buffer = vec![0_u8; 8 * 8 * 4];

    let result = decoder.decode_scan_line_block(0, &mut [
        ChannelTarget { buffer: &mut buffer, pixel_stride: 4, line_stride: 8 * 4 }
    ]);
    assert!(matches!(result, Err(Error::ScanLineApiOnTiledPart)));
}

#[test]
fn long_names_survive_a_roundtrip(){
    let mut context = WriteContext::new(memory_stream());

    let name = Text::new_or_panic("a part name that is well beyond the thirty-one byte short bound");
    context.add_part(
        PartDefinition::scan_lines(IntegerBounds::from_dimensions((8, 4)), luma_channels())
            .with_name(name.clone())
    ).unwrap();

    context.write_header().unwrap();
    assert!(context.meta_data().unwrap().requirements.has_long_names);

    encode_all_chunks(&context, 0);
    let read = ReadContext::read_from(context.finish().unwrap()).unwrap();

    assert!(read.meta_data().requirements.has_long_names);
    assert_eq!(read.headers()[0].name, Some(name));
}

#[test]
fn corrupt_offset_tables_are_rejected_on_open(){
    let mut context = WriteContext::new(memory_stream());

    context.add_part(PartDefinition::scan_lines(
        IntegerBounds::from_dimensions((8, 4)), luma_channels()
    )).unwrap();

    context.write_header().unwrap();
    encode_all_chunks(&context, 0);

    let mut bytes = context.finish().unwrap().into_inner().into_inner();

    // the offset tables start directly after the headers
    let table_position = {
        let valid = ReadContext::read_from(bytes.as_slice()).unwrap();
        valid.meta_data().byte_size()
    };

    // an offset beyond the end of the stream
    bytes[table_position .. table_position + 8].copy_from_slice(&u64::MAX.to_le_bytes());
    assert!(ReadContext::read_from(bytes.as_slice()).is_err());

    // an offset into the header region
    bytes[table_position .. table_position + 8].copy_from_slice(&4_u64.to_le_bytes());
    assert!(ReadContext::read_from(bytes.as_slice()).is_err());
}

#[test]
fn strided_buffers_roundtrip_and_preserve_gaps(){
    let mut context = WriteContext::new(memory_stream());

    context.add_part(
        PartDefinition::scan_lines(IntegerBounds::from_dimensions((16, 8)), luma_channels())
            .with_compression(Compression::ZIP16)
    ).unwrap();

    context.write_header().unwrap();

    let header = context.meta_data().unwrap().headers[0].clone();
    let coordinates = header.blocks_increasing_y_order().next().unwrap().location;
    let bounds = header.get_absolute_block_pixel_coordinates(coordinates).unwrap();
    let expected = sample_bytes(bounds, 0);

    {
        // the source leaves a 4 byte gap after every sample
        let mut strided_source = vec![0_u8; bounds.size.area() * 8];
        for (sample_index, sample) in expected.chunks_exact(4).enumerate() {
            strided_source[sample_index * 8 .. sample_index * 8 + 4].copy_from_slice(sample);
        }

        let mut encoder = context.chunk_encoder(0).unwrap();
        encoder.encode_chunk(coordinates, &[
            ChannelSource {
                buffer: &strided_source,
                pixel_stride: 8,
                line_stride: bounds.size.width() * 8,
            }
        ]).unwrap();
    }

    let read = ReadContext::read_from(context.finish().unwrap()).unwrap();
    let mut decoder = read.chunk_decoder(0).unwrap();

    // the target gaps must stay untouched while the samples are filled in
    let mut strided_target = vec![0xaa_u8; bounds.size.area() * 8];
    decoder.decode_chunk(coordinates, &mut [
        ChannelTarget {
            buffer: &mut strided_target,
            pixel_stride: 8,
            line_stride: bounds.size.width() * 8,
        }
    ]).unwrap();

    for (sample_index, sample) in expected.chunks_exact(4).enumerate() {
        assert_eq!(&strided_target[sample_index * 8 .. sample_index * 8 + 4], sample);
        assert_eq!(&strided_target[sample_index * 8 + 4 .. sample_index * 8 + 8], &[0xaa; 4]);
    }
}
