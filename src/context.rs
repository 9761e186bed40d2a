
//! Open files for chunk-level reading and writing.
//!
//! A context owns the stream and the parsed or pending metadata.
//! Reading parses all metadata once on open and is immutable afterwards,
//! so chunks can be decoded from multiple threads through a shared reference.
//! Writing goes through three phases: defining parts, committing the header,
//! and writing chunks, which again is safe from multiple threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::block::chunk::TileCoordinates;
use crate::block::decode::ChunkDecoder;
use crate::block::encode::ChunkEncoder;
use crate::compression::Compression;
use crate::error::{Error, Result, UnitResult, usize_to_u64};
use crate::io::{Data, PeekRead, ReadAt, StreamReader, WriteAt};
use crate::math::Vec2;
use crate::meta::attribute::{
    AttributeValue, ChannelList, IntegerBounds, LineOrder,
    OpaqueTypeHandler, Text, TileDescription, SHORT_NAME_MAX_LEN,
};
use crate::meta::header::{AttributeList, Header};
use crate::meta::{MetaData, OffsetTable, Requirements};


/// An open file, ready to decode chunks.
///
/// All metadata is parsed and validated when the context is created.
/// Afterwards the context never changes, which is why any number of
/// threads may decode chunks concurrently through `&self`.
#[derive(Debug)]
pub struct ReadContext<R> {
    stream: R,
    meta_data: MetaData,
    offset_tables: Vec<OffsetTable>,
}

impl<R: ReadAt> ReadContext<R> {

    /// Open a stream for reading: parse the magic number, the version
    /// requirements, all part headers and all chunk offset tables.
    pub fn read_from(stream: R) -> Result<Self> {
        let mut read = PeekRead::new(StreamReader::new(&stream));

        let meta_data = MetaData::read_validated_from_buffered_peekable(&mut read)?;
        let offset_tables = MetaData::read_offset_tables(&mut read, &meta_data.headers)?;

        // chunks can only start after the offset tables
        let min_chunk_offset = usize_to_u64(
            meta_data.byte_size() + MetaData::offset_tables_byte_size(&meta_data.headers)
        );

        crate::block::validate_offsets(&offset_tables, stream.byte_len()?, min_chunk_offset)?;

        drop(read);
        Ok(ReadContext { stream, meta_data, offset_tables })
    }

    /// All metadata of this file.
    pub fn meta_data(&self) -> &MetaData {
        &self.meta_data
    }

    /// The headers of all parts in this file.
    pub fn headers(&self) -> &[Header] {
        &self.meta_data.headers
    }

    /// Number of parts in this file.
    pub fn part_count(&self) -> usize {
        self.meta_data.headers.len()
    }

    /// The header of the specified part.
    pub fn header(&self, part_index: usize) -> Result<&Header> {
        self.meta_data.headers.get(part_index)
            .ok_or_else(|| Error::ArgumentOutOfRange("part index".into()))
    }

    /// The chunk offset table of the specified part.
    pub fn offset_table(&self, part_index: usize) -> Result<&OffsetTable> {
        self.offset_tables.get(part_index)
            .ok_or_else(|| Error::ArgumentOutOfRange("part index".into()))
    }

    /// The absolute byte offset of the specified chunk.
    pub(crate) fn chunk_offset(&self, part_index: usize, chunk_index: usize) -> Result<u64> {
        self.offset_table(part_index)?.get(chunk_index).copied()
            .ok_or_else(|| Error::ArgumentOutOfRange("chunk index".into()))
    }

    /// The stream this context reads from.
    pub(crate) fn stream(&self) -> &R {
        &self.stream
    }

    /// Create a decoder for the chunks of one part.
    /// Each thread should use its own decoder,
    /// any number of them may run concurrently.
    pub fn chunk_decoder(&self, part_index: usize) -> Result<ChunkDecoder<'_, R>> {
        self.header(part_index)?;
        Ok(ChunkDecoder::new(self, part_index))
    }

    /// Unwrap the stream this context was reading from.
    pub fn into_inner(self) -> R {
        self.stream
    }
}


/// Describes one part of a file that is about to be written.
/// Collected by a `WriteContext` in the defining phase
/// and turned into a `Header` when the header is committed.
#[derive(Debug, Clone)]
pub struct PartDefinition {

    /// The name of this part. Required if the file has multiple parts.
    pub name: Option<Text>,

    /// The pixel rectangle this part covers.
    pub data_window: IntegerBounds,

    /// The rectangle that should be displayed.
    pub display_window: IntegerBounds,

    /// The channels of this part, stored by ascending name.
    pub channels: ChannelList,

    /// How the chunks of this part are compressed.
    pub compression: Compression,

    /// In what order the chunks will appear in the file.
    pub line_order: LineOrder,

    /// All attributes that are not represented by the typed fields.
    pub attributes: AttributeList,

    tiled: bool,
    tiles: Option<TileDescription>,
}

impl PartDefinition {

    /// Define a part that stores scan line blocks.
    pub fn scan_lines(data_window: IntegerBounds, channels: ChannelList) -> Self {
        PartDefinition {
            name: None,
            data_window,
            display_window: data_window,
            channels,
            compression: Compression::Uncompressed,
            line_order: LineOrder::Unspecified,
            attributes: AttributeList::new(),
            tiled: false,
            tiles: None,
        }
    }

    /// Define a part that stores tiles. The tile description
    /// must be supplied before the header can be written.
    pub fn tiled(data_window: IntegerBounds, channels: ChannelList) -> Self {
        PartDefinition { tiled: true, .. Self::scan_lines(data_window, channels) }
    }

    /// Set the compression of this part.
    pub fn with_compression(self, compression: Compression) -> Self {
        Self { compression, .. self }
    }

    /// Set the name of this part.
    pub fn with_name(self, name: Text) -> Self {
        Self { name: Some(name), .. self }
    }

    /// Set the tile layout of this part.
    /// Fails for parts that were defined to store scan lines.
    pub fn set_tile_description(&mut self, tiles: TileDescription) -> UnitResult {
        if !self.tiled {
            return Err(Error::TileApiOnScanLinePart);
        }

        self.tiles = Some(tiles);
        Ok(())
    }

    /// Same as `set_tile_description`, for use while building.
    pub fn with_tiles(mut self, tiles: TileDescription) -> Result<Self> {
        self.set_tile_description(tiles)?;
        Ok(self)
    }

    /// Whether this part was defined to store tiles.
    pub fn is_tiled(&self) -> bool {
        self.tiled
    }

    /// The longest name declared in this part, in bytes.
    fn max_name_len(&self) -> usize {
        let channel_names = self.channels.list.iter().map(|channel| channel.name.len()).max().unwrap_or(0);
        let part_name = self.name.as_ref().map(Text::len).unwrap_or(0);
        channel_names.max(part_name).max(self.attributes.max_name_len())
    }

    /// Turn this definition into a header.
    /// Tiled parts without a tile description are rejected here.
    fn into_header(self) -> Result<Header> {
        let mut header = Header::new(self.data_window, self.channels)
            .with_encoding(self.compression, self.line_order);

        if self.tiled {
            let tiles = self.tiles.ok_or(Error::MissingRequiredAttribute("tiles"))?;
            header = header.with_tiles(tiles);
        }

        if let Some(name) = self.name {
            header = header.with_name(name);
        }

        header.display_window = self.display_window;
        header.custom_attributes = self.attributes;
        Ok(header)
    }
}


/// State of a write context after the header has been committed.
struct CommittedWrite {
    meta_data: MetaData,

    /// Where the offset tables start in the stream.
    table_position: u64,

    /// The next unclaimed byte in the stream. Chunk writers reserve their
    /// range with a fetch-add, so concurrent writes never overlap.
    next_free_byte: AtomicU64,

    /// One offset slot per chunk per part.
    /// Zero marks a chunk that has not been written yet.
    offset_tables: Vec<Vec<AtomicU64>>,

    /// How many chunks of each part have been written so far.
    chunks_written: Vec<AtomicUsize>,

    /// The part that currently accepts chunks.
    /// Parts must be completed in index order.
    current_part: AtomicUsize,
}

/// A file that is being written.
///
/// Starts out in the defining phase, where parts and attributes can be
/// added freely. `write_header` validates and commits all metadata to the
/// stream; afterwards, only chunk writes are accepted, and those may come
/// from any number of threads. `finish` flushes the offset tables.
pub struct WriteContext<W> {
    stream: W,
    parts: Vec<PartDefinition>,
    long_names: Option<bool>,
    opaque_handlers: Vec<(Text, Arc<dyn OpaqueTypeHandler>)>,
    committed: Option<CommittedWrite>,
}

impl<W> std::fmt::Debug for WriteContext<W> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("WriteContext")
            .field("parts", &self.parts.len())
            .field("committed", &self.committed.is_some())
            .finish()
    }
}

impl<W: WriteAt> WriteContext<W> {

    /// Start defining a file that will be written to the stream.
    pub fn new(stream: W) -> Self {
        WriteContext {
            stream,
            parts: Vec::new(),
            long_names: None,
            opaque_handlers: Vec::new(),
            committed: None,
        }
    }

    fn require_defining(&self) -> UnitResult {
        if self.committed.is_some() { Err(Error::HeaderAlreadyWritten) }
        else { Ok(()) }
    }

    fn require_committed(&self) -> Result<&CommittedWrite> {
        self.committed.as_ref().ok_or(Error::NotOpenForWriting)
    }

    /// Add a part to the file. Returns the index of the new part.
    /// Fails after the header has been committed.
    pub fn add_part(&mut self, mut part: PartDefinition) -> Result<usize> {
        self.require_defining()?;

        // attributes declared before their handler pick it up now
        for (type_name, handler) in &self.opaque_handlers {
            patch_opaque_handlers(&mut part.attributes, type_name, handler);
        }

        self.parts.push(part);
        Ok(self.parts.len() - 1)
    }

    /// Access a part for further definition.
    /// Fails after the header has been committed.
    pub fn part_mut(&mut self, part_index: usize) -> Result<&mut PartDefinition> {
        self.require_defining()?;
        self.parts.get_mut(part_index)
            .ok_or_else(|| Error::ArgumentOutOfRange("part index".into()))
    }

    /// Number of parts defined so far.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Allow or forbid attribute, channel and part names longer than 31 bytes.
    /// Enabling always succeeds. Disabling fails with `NameTooLong`
    /// if any name declared so far exceeds the short bound.
    pub fn set_long_names(&mut self, enabled: bool) -> UnitResult {
        self.require_defining()?;

        if !enabled {
            let max_len = self.parts.iter().map(PartDefinition::max_name_len).max().unwrap_or(0);
            if max_len > SHORT_NAME_MAX_LEN {
                return Err(Error::NameTooLong(
                    "cannot disable long names while names longer than 31 bytes exist".into()
                ));
            }
        }

        self.long_names = Some(enabled);
        Ok(())
    }

    /// Register a handler for an opaque attribute type.
    ///
    /// All opaque attributes of this type that were already declared are
    /// patched to use the handler; attributes declared later pick it up
    /// automatically. The registration is local to this context.
    pub fn register_opaque_handler(&mut self, type_name: Text, handler: Arc<dyn OpaqueTypeHandler>) -> UnitResult {
        self.require_defining()?;

        for part in &mut self.parts {
            patch_opaque_handlers(&mut part.attributes, &type_name, &handler);
        }

        match self.opaque_handlers.iter_mut().find(|(name, _)| name == &type_name) {
            Some((_, existing)) => *existing = handler,
            None => self.opaque_handlers.push((type_name, handler)),
        }

        Ok(())
    }

    /// Insert an attribute into a part, given its value as raw bytes
    /// and the name of its type. Built-in type names are parsed into
    /// their typed form; any other type is stored as an opaque value,
    /// carrying the handler registered for that type, if any.
    pub fn insert_attribute_by_type_name(
        &mut self, part_index: usize,
        name: Text, type_name: Text, bytes: Vec<u8>,
    ) -> UnitResult {
        let handler = self.opaque_handlers.iter()
            .find(|(registered, _)| registered == &type_name)
            .map(|(_, handler)| handler.clone());

        self.part_mut(part_index)?
            .attributes.insert_by_type_name(name, type_name, bytes, handler)
    }

    /// Validate all definitions and write the file header:
    /// magic number, version flags, all part headers, and zeroed
    /// placeholders for the offset tables.
    ///
    /// Afterwards, parts can no longer be modified,
    /// and the context accepts chunk writes.
    pub fn write_header(&mut self) -> UnitResult {
        self.require_defining()?;

        let headers = self.parts.iter().cloned()
            .map(PartDefinition::into_header)
            .collect::<Result<Vec<Header>>>()?;

        let mut requirements = Requirements::infer(&headers);

        match self.long_names {
            Some(true) => requirements.has_long_names = true,

            // names may have been added since the toggle was disabled
            Some(false) => if requirements.has_long_names {
                return Err(Error::NameTooLong(
                    "long names were disabled, but a name exceeds 31 bytes".into()
                ));
            },

            None => {},
        }

        let meta_data = MetaData { requirements, headers };

        let mut bytes = Vec::with_capacity(
            meta_data.byte_size() + MetaData::offset_tables_byte_size(&meta_data.headers)
        );

        meta_data.write_validating_to_buffered(&mut bytes)?;
        let table_position = usize_to_u64(bytes.len());

        // zeroed placeholders, rewritten on finish
        let chunk_counts: Vec<usize> = meta_data.headers.iter().map(|header| header.chunk_count).collect();
        for &count in &chunk_counts {
            for _ in 0 .. count {
                0_u64.write(&mut bytes)?;
            }
        }

        self.stream.write_all_at(0, &bytes)?;

        self.committed = Some(CommittedWrite {
            meta_data,
            table_position,
            next_free_byte: AtomicU64::new(usize_to_u64(bytes.len())),
            offset_tables: chunk_counts.iter()
                .map(|&count| (0 .. count).map(|_| AtomicU64::new(0)).collect())
                .collect(),
            chunks_written: chunk_counts.iter().map(|_| AtomicUsize::new(0)).collect(),
            current_part: AtomicUsize::new(0),
        });

        Ok(())
    }

    /// The validated metadata, as committed by `write_header`.
    pub fn meta_data(&self) -> Result<&MetaData> {
        Ok(&self.require_committed()?.meta_data)
    }

    /// The committed header of the specified part.
    pub(crate) fn committed_header(&self, part_index: usize) -> Result<&Header> {
        self.require_committed()?.meta_data.headers.get(part_index)
            .ok_or_else(|| Error::ArgumentOutOfRange("part index".into()))
    }

    /// Create an encoder for the chunks of one part.
    /// Each thread should use its own encoder,
    /// any number of them may run concurrently.
    /// Fails before the header has been committed.
    pub fn chunk_encoder(&self, part_index: usize) -> Result<ChunkEncoder<'_, W>> {
        self.committed_header(part_index)?;
        Ok(ChunkEncoder::new(self, part_index))
    }

    /// Reserve a byte range for the serialized chunk, write it there,
    /// and remember the offset under the logical chunk index.
    /// Chunks of the same part may be written in any order and from any
    /// thread, but parts must be completed in index order.
    pub(crate) fn write_chunk_bytes(&self, part_index: usize, chunk_index: usize, bytes: &[u8]) -> UnitResult {
        let committed = self.require_committed()?;

        if part_index != committed.current_part.load(Ordering::SeqCst) {
            return Err(Error::ArgumentOutOfRange("parts must be completed in index order".into()));
        }

        let table = &committed.offset_tables[part_index];
        let slot = table.get(chunk_index)
            .ok_or_else(|| Error::ArgumentOutOfRange("chunk index".into()))?;

        let offset = committed.next_free_byte.fetch_add(usize_to_u64(bytes.len()), Ordering::SeqCst);

        if slot.compare_exchange(0, offset, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(Error::invalid("chunk was already written"));
        }

        self.stream.write_all_at(offset, bytes)?;

        let chunk_count = committed.meta_data.headers[part_index].chunk_count;
        let written = committed.chunks_written[part_index].fetch_add(1, Ordering::SeqCst) + 1;

        if written == chunk_count {
            committed.current_part.store(part_index + 1, Ordering::SeqCst);
        }

        Ok(())
    }

    /// Write the offset tables of all parts and return the stream.
    /// Fails if the header was never committed,
    /// or if any chunk was never written.
    pub fn finish(self) -> Result<W> {
        let committed = match &self.committed {
            Some(committed) => committed,
            None => return Err(Error::NotOpenForWriting),
        };

        let mut bytes = Vec::with_capacity(
            MetaData::offset_tables_byte_size(&committed.meta_data.headers)
        );

        for (part_index, table) in committed.offset_tables.iter().enumerate() {
            let written = committed.chunks_written[part_index].load(Ordering::SeqCst);

            if written != table.len() {
                return Err(Error::invalid(format!(
                    "cannot finish file: {} of {} chunks of part {} were never written",
                    table.len() - written, table.len(), part_index
                )));
            }

            for slot in table {
                let offset = slot.load(Ordering::SeqCst);
                debug_assert_ne!(offset, 0, "unwritten chunk escaped the count check");
                offset.write(&mut bytes)?;
            }
        }

        self.stream.write_all_at(committed.table_position, &bytes)?;
        Ok(self.stream)
    }
}

/// Attach the handler to all opaque attributes of the matching type.
fn patch_opaque_handlers(attributes: &mut AttributeList, type_name: &Text, handler: &Arc<dyn OpaqueTypeHandler>) {
    for attribute in attributes.iter_mut() {
        if let AttributeValue::Opaque(opaque) = &mut attribute.value {
            if &opaque.kind == type_name {
                opaque.attach_handler(handler.clone());
            }
        }
    }
}


/// Shorthand for resolving scan line and tile coordinates,
/// shared by the encode and decode pipelines.
pub(crate) fn scan_line_coordinates(header: &Header, y_coordinate: i32) -> Result<TileCoordinates> {
    header.get_scan_line_block_coordinates(y_coordinate)
}

/// Resolve a tile index to chunk coordinates,
/// failing with the mixed-api error on scan line parts.
pub(crate) fn tile_coordinates(header: &Header, tile_index: Vec2<usize>, level_index: Vec2<usize>) -> Result<TileCoordinates> {
    header.tile_description()?; // fails for scan line parts
    Ok(TileCoordinates { tile_index, level_index })
}
