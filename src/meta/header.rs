
//! Per-part headers and the ordered attribute list they are built on.

use crate::block::chunk::TileCoordinates;
use crate::compression::Compression;
use crate::error::*;
use crate::io::*;
use crate::math::*;
use crate::meta::attribute::{self, *};
use crate::meta::*;
use std::sync::Arc;


/// One named attribute inside a header.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {

    /// The name of this attribute, restricted by the long-name mode of the file.
    pub name: Text,

    /// The value of this attribute.
    pub value: AttributeValue,
}

/// An ordered list of attributes.
/// Entries keep their insertion order, names are unique.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributeList {
    attributes: Vec<Attribute>,
}

/// Describes a single part in a file.
/// A file can have any number of parts.
/// The meta data contains one header per part.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {

    /// List of channels in this part, ordered by ascending name.
    pub channels: ChannelList,

    /// How the pixel data of all channels in this part is compressed. May be `Compression::Uncompressed`.
    pub compression: Compression,

    /// Describes how the pixels of this part are divided into smaller blocks,
    /// and whether this part contains multiple resolution levels.
    pub blocks: Blocks,

    /// In what order the chunks of this header occur in the file.
    pub line_order: LineOrder,

    /// The rectangle that this part covers in the global infinite 2D space of the file.
    pub data_window: IntegerBounds,

    /// The rectangle that should be displayed. Usually the same for all parts.
    pub display_window: IntegerBounds,

    /// Aspect ratio of each pixel in this part.
    pub pixel_aspect: f32,

    /// Part of the perspective projection. Default should be `(0, 0)`.
    pub screen_window_center: Vec2<f32>,

    /// Part of the perspective projection. Default should be `1`.
    pub screen_window_width: f32,

    /// The name of this part.
    /// Required if the file contains multiple parts.
    pub name: Option<Text>,

    /// Whether this part contains deep data.
    pub deep: bool,

    /// Number of chunks, that is, scan line blocks or tiles, that this part has been divided into.
    /// Always recomputed from the data window, block layout and compression,
    /// never trusted from the file.
    pub chunk_count: usize,

    /// All attributes of this header that are not
    /// represented by one of the typed fields above.
    pub custom_attributes: AttributeList,
}

/// How the pixels of a part are split up into separate chunks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Blocks {

    /// The part is divided into scan line blocks.
    /// The number of scan lines in a block depends on the compression method.
    ScanLines,

    /// The part is divided into tile blocks.
    /// Also specifies the size of each tile in the image
    /// and whether this part contains multiple resolution levels.
    Tiles(TileDescription),
}

/// The names of the attributes that are mapped
/// to the typed fields of `Header` instead of the open list.
pub mod required_attribute_names {
    macro_rules! define_required_attribute_names {
        ( $($name: ident : $value: expr),* ) => { $(
            /// The byte-string name of this required attribute as it appears in an exr file.
            pub const $name: &'static [u8] = $value;
        )* };
    }

    define_required_attribute_names! {
        TILES:          b"tiles",
        NAME:           b"name",
        BLOCK_TYPE:     b"type",
        CHUNKS:         b"chunkCount",
        CHANNELS:       b"channels",
        COMPRESSION:    b"compression",
        DATA_WINDOW:    b"dataWindow",
        DISPLAY_WINDOW: b"displayWindow",
        LINE_ORDER:     b"lineOrder",
        PIXEL_ASPECT:   b"pixelAspectRatio",
        WINDOW_CENTER:  b"screenWindowCenter",
        WINDOW_WIDTH:   b"screenWindowWidth"
    }

    /// All names reserved for the typed header fields.
    pub const ALL: &[&[u8]] = &[
        TILES, NAME, BLOCK_TYPE, CHUNKS, CHANNELS, COMPRESSION,
        DATA_WINDOW, DISPLAY_WINDOW, LINE_ORDER, PIXEL_ASPECT,
        WINDOW_CENTER, WINDOW_WIDTH,
    ];
}


impl AttributeList {

    /// Create an empty attribute list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attributes in this list.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// True if this list contains no attributes.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterate over the attributes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    /// Iterate mutably over the attributes in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Attribute> {
        self.attributes.iter_mut()
    }

    /// Whether an attribute with this name exists.
    pub fn contains(&self, name: &Text) -> bool {
        self.attributes.iter().any(|attribute| &attribute.name == name)
    }

    /// Add an attribute to the end of the list.
    /// The name must be non-empty and not longer than 255 bytes;
    /// the short 31 byte bound is enforced by the owning context,
    /// which knows the long-name mode, not by the list.
    /// Fails if an attribute with this name already exists.
    pub fn insert(&mut self, name: Text, value: AttributeValue) -> UnitResult {
        name.validate_name_length(true)?;

        if self.contains(&name) {
            return Err(Error::invalid("duplicate attribute name"));
        }

        self.attributes.push(Attribute { name, value });
        Ok(())
    }

    /// Add an attribute from its raw parts: a type name and the value bytes.
    /// Built-in type names are parsed into their typed value.
    /// Unknown type names are stored as opaque values,
    /// optionally already carrying a handler for their type.
    pub fn insert_by_type_name(
        &mut self, name: Text, type_name: Text, bytes: Vec<u8>,
        handler: Option<Arc<dyn OpaqueTypeHandler>>,
    ) -> UnitResult
    {
        let value = {
            if attribute::type_names::is_builtin(type_name.as_slice()) {
                let byte_count = bytes.len();
                AttributeValue::read(&mut PeekRead::new(bytes.as_slice()), type_name, byte_count)??
            }
            else {
                let mut value = OpaqueValue::from_packed(type_name, bytes);
                if let Some(handler) = handler { value.attach_handler(handler); }
                AttributeValue::Opaque(value)
            }
        };

        self.insert(name, value)
    }

    /// Remove the attribute with this name from the list and return it.
    /// Removing a name that does not exist is an error,
    /// so removing the same attribute twice always fails the second time.
    pub fn remove(&mut self, name: &Text) -> Result<Attribute> {
        let index = self.attributes.iter().position(|attribute| &attribute.name == name)
            .ok_or_else(|| Error::NoAttributeByName(name.to_string()))?;

        Ok(self.attributes.remove(index))
    }

    /// Find the value of the attribute with this name.
    pub fn find(&self, name: &Text) -> Result<&AttributeValue> {
        self.attributes.iter()
            .find(|attribute| &attribute.name == name)
            .map(|attribute| &attribute.value)
            .ok_or_else(|| Error::NoAttributeByName(name.to_string()))
    }

    /// Find the value of the attribute with this name, for mutation.
    pub fn find_mut(&mut self, name: &Text) -> Result<&mut AttributeValue> {
        self.attributes.iter_mut()
            .find(|attribute| &attribute.name == name)
            .map(|attribute| &mut attribute.value)
            .ok_or_else(|| Error::NoAttributeByName(name.to_string()))
    }

    /// The exact number of bytes these attributes will consume when written.
    pub fn byte_size(&self) -> usize {
        self.attributes.iter()
            .map(|attr| attribute::byte_size(&attr.name, &attr.value))
            .sum()
    }

    /// Without validation, write all attributes to the byte stream.
    pub fn write(&self, write: &mut impl Write) -> UnitResult {
        for attr in &self.attributes {
            attribute::write(attr.name.as_slice(), &attr.value, write)?;
        }

        Ok(())
    }

    /// Validate all attribute names against the active name length bound,
    /// and all values against their own requirements.
    pub fn validate(&self, long_names_allowed: bool, allow_sampling: bool, data_window: IntegerBounds) -> UnitResult {
        for attr in &self.attributes {
            attribute::validate(&attr.name, &attr.value, long_names_allowed, allow_sampling, data_window)?;
        }

        Ok(())
    }

    /// The longest attribute name in this list, in bytes.
    pub fn max_name_len(&self) -> usize {
        self.attributes.iter().map(|attr| attr.name.len()).max().unwrap_or(0)
    }
}


impl Blocks {

    /// Whether this part is tiled. If false, this part is divided into scan line blocks.
    pub fn has_tiles(&self) -> bool {
        matches!(self, Blocks::Tiles(_))
    }
}


impl Header {

    /// Create a new header for a scan line part with the specified channels.
    ///
    /// The other settings are left to their default values:
    /// - no compression
    /// - display window equal to data window
    /// - unspecified line order
    /// - no custom attributes
    pub fn new(data_window: IntegerBounds, channels: ChannelList) -> Self {
        let compression = Compression::Uncompressed;
        let blocks = Blocks::ScanLines;

        Self {
            chunk_count: compute_chunk_count(compression, data_window.size, blocks),

            channels, compression, blocks,
            line_order: LineOrder::Unspecified,

            data_window,
            display_window: data_window,
            pixel_aspect: 1.0,
            screen_window_center: Vec2(0.0, 0.0),
            screen_window_width: 1.0,

            name: None,
            deep: false,
            custom_attributes: AttributeList::new(),
        }
    }

    /// Set compression and line order. Automatically recomputes the chunk count.
    pub fn with_encoding(self, compression: Compression, line_order: LineOrder) -> Self {
        Self {
            chunk_count: compute_chunk_count(compression, self.data_window.size, self.blocks),
            compression, line_order,
            .. self
        }
    }

    /// Divide this part into tiles instead of scan line blocks.
    /// Automatically recomputes the chunk count.
    pub fn with_tiles(self, tiles: TileDescription) -> Self {
        let blocks = Blocks::Tiles(tiles);

        Self {
            chunk_count: compute_chunk_count(self.compression, self.data_window.size, blocks),
            blocks,
            .. self
        }
    }

    /// Set the name of this part.
    pub fn with_name(self, name: Text) -> Self {
        Self { name: Some(name), .. self }
    }

    /// The resolution of this part. Equals the size of the data window.
    pub fn data_size(&self) -> Vec2<usize> {
        self.data_window.size
    }

    /// Whether this part stores tiles instead of scan line blocks.
    pub fn has_tiles(&self) -> bool {
        self.blocks.has_tiles()
    }

    /// The tile description of this part.
    /// Fails with the mixed-api error if this is a scan line part.
    pub fn tile_description(&self) -> Result<TileDescription> {
        match self.blocks {
            Blocks::Tiles(tiles) => Ok(tiles),
            Blocks::ScanLines => Err(Error::TileApiOnScanLinePart),
        }
    }

    /// Iterate over all chunks of this part in the order the offset table
    /// references them: level by level, each level row by row,
    /// each row left to right.
    pub fn blocks_increasing_y_order(&self) -> impl Iterator<Item = TileIndices> + ExactSizeIterator + DoubleEndedIterator {
        fn tiles_of(image_size: Vec2<usize>, tile_size: Vec2<usize>, level_index: Vec2<usize>) -> impl Iterator<Item = TileIndices> {
            fn divide_and_rest(total_size: usize, block_size: usize) -> impl Iterator<Item = (usize, usize)> {
                let block_count = compute_block_count(total_size, block_size);
                (0..block_count).map(move |block_index| (
                    block_index,
                    calculate_block_size(total_size, block_size, block_size * block_index)
                        .expect("block size calculation bug")
                ))
            }

            divide_and_rest(image_size.height(), tile_size.height()).flat_map(move |(y_index, tile_height)| {
                divide_and_rest(image_size.width(), tile_size.width()).map(move |(x_index, tile_width)| {
                    TileIndices {
                        size: Vec2(tile_width, tile_height),
                        location: TileCoordinates { tile_index: Vec2(x_index, y_index), level_index },
                    }
                })
            })
        }

        let vec: Vec<TileIndices> = {
            if let Blocks::Tiles(tiles) = self.blocks {
                match tiles.level_mode {
                    LevelMode::Singular => {
                        tiles_of(self.data_size(), tiles.tile_size, Vec2(0, 0)).collect()
                    },

                    LevelMode::MipMap => {
                        mip_map_levels(tiles.rounding_mode, self.data_size())
                            .flat_map(move |(level_index, level_size)| {
                                tiles_of(level_size, tiles.tile_size, Vec2(level_index, level_index))
                            })
                            .collect()
                    },

                    LevelMode::RipMap => {
                        rip_map_levels(tiles.rounding_mode, self.data_size())
                            .flat_map(move |(level_index, level_size)| {
                                tiles_of(level_size, tiles.tile_size, level_index)
                            })
                            .collect()
                    },
                }
            }
            else {
                let block = Vec2(self.data_size().width(), self.compression.scan_lines_per_block());
                tiles_of(self.data_size(), block, Vec2(0, 0)).collect()
            }
        };

        vec.into_iter()
    }

    /// Resolve a chunk coordinate to its position in the offset table.
    /// Fails for coordinates outside the part.
    pub fn chunk_index_of(&self, coordinates: TileCoordinates) -> Result<usize> {
        self.blocks_increasing_y_order()
            .position(|block| block.location == coordinates)
            .ok_or_else(|| Error::invalid("chunk coordinates out of range"))
    }

    /// The dimensions, in pixels, of the default block of this part.
    /// Blocks in the last column or row may be smaller,
    /// clipped to the remaining pixels of the data window.
    pub fn default_block_pixel_size(&self) -> Vec2<usize> {
        match self.blocks {
            Blocks::ScanLines => Vec2(self.data_size().width(), self.compression.scan_lines_per_block()),
            Blocks::Tiles(tiles) => tiles.tile_size,
        }
    }

    /// Calculate the pixel rectangle of a block inside this part. Is not negative. Starts at `0`.
    pub fn get_absolute_block_pixel_coordinates(&self, tile: TileCoordinates) -> Result<IntegerBounds> {
        if let Blocks::Tiles(tiles) = self.blocks {
            let Vec2(data_width, data_height) = self.data_size();

            let level_width = compute_level_size(tiles.rounding_mode, data_width, tile.level_index.x());
            let level_height = compute_level_size(tiles.rounding_mode, data_height, tile.level_index.y());
            let absolute_tile_coordinates = tile.to_data_indices(tiles.tile_size, Vec2(level_width, level_height))?;

            if absolute_tile_coordinates.position.x() as i64 >= level_width as i64
                || absolute_tile_coordinates.position.y() as i64 >= level_height as i64
            {
                return Err(Error::invalid("data block tile index"));
            }

            Ok(absolute_tile_coordinates)
        }
        else {
            debug_assert_eq!(tile.tile_index.x(), 0, "block index calculation bug");

            let (y, height) = calculate_block_position_and_size(
                self.data_size().height(),
                self.compression.scan_lines_per_block(),
                tile.tile_index.y(),
            )?;

            Ok(IntegerBounds {
                position: Vec2(0, usize_to_i32(y, "block y position")?),
                size: Vec2(self.data_size().width(), height),
            })
        }
    }

    /// Convert an absolute scan line y coordinate into block coordinates.
    /// Fails with the mixed-api error if this is a tiled part.
    pub fn get_scan_line_block_coordinates(&self, block_y_coordinate: i32) -> Result<TileCoordinates> {
        if self.has_tiles() {
            return Err(Error::ScanLineApiOnTiledPart);
        }

        let lines_per_block = self.compression.scan_lines_per_block() as i32;
        let relative_y = block_y_coordinate - self.data_window.position.y();

        if relative_y < 0 || relative_y as i64 >= self.data_size().height() as i64 {
            return Err(Error::invalid("scan line block y coordinate"));
        }

        Ok(TileCoordinates {
            tile_index: Vec2(0, (relative_y / lines_per_block) as usize),
            level_index: Vec2(0, 0),
        })
    }

    /// Maximum byte length of an uncompressed block of this part, used for validation.
    pub fn max_block_byte_size(&self) -> usize {
        self.channels.bytes_per_pixel * match self.blocks {
            Blocks::Tiles(tiles) => tiles.tile_size.area(),
            Blocks::ScanLines => self.compression.scan_lines_per_block() * self.data_size().width(),
        }
    }

    /// The longest attribute, channel, or part name in this header, in bytes.
    pub fn max_name_len(&self) -> usize {
        let channel_names = self.channels.list.iter().map(|chan| chan.name.len()).max().unwrap_or(0);
        let part_name = self.name.as_ref().map(Text::len).unwrap_or(0);
        channel_names.max(part_name).max(self.custom_attributes.max_name_len())
    }

    /// Validate this instance against the requirements of the file.
    pub fn validate(&self, requirements: &Requirements) -> UnitResult {
        debug_assert_eq!(
            self.chunk_count, compute_chunk_count(self.compression, self.data_size(), self.blocks),
            "incorrect chunk count value"
        );

        self.data_window.validate(None)?;
        self.display_window.validate(None)?;

        if self.data_window.size == Vec2(0, 0) {
            return Err(Error::invalid("empty data window"));
        }

        if requirements.is_multipart() && self.name.is_none() {
            return Err(Error::MissingRequiredAttribute("name"));
        }

        if let Blocks::Tiles(tiles) = self.blocks {
            tiles.validate()?;
        }

        if self.deep {
            return Err(Error::unsupported("deep data not supported yet"));
        }

        if !self.pixel_aspect.is_normal() || self.pixel_aspect < 1.0e-6 || self.pixel_aspect > 1.0e6 {
            return Err(Error::invalid("pixel aspect ratio"));
        }

        if self.screen_window_width < 0.0 {
            return Err(Error::invalid("screen window width"));
        }

        let allow_sampling = !self.deep && self.blocks == Blocks::ScanLines;
        self.channels.validate(allow_sampling, self.data_window, requirements.has_long_names)?;

        if let Some(name) = &self.name {
            name.validate_name_length(requirements.has_long_names)?;
        }

        // required attribute names must not also appear in the open list
        for &reserved in required_attribute_names::ALL {
            if self.custom_attributes.contains(&attribute::Text::from_static(reserved)) {
                return Err(Error::invalid(format!(
                    "attribute name `{}` is reserved and cannot be custom",
                    Text::from_static(reserved)
                )));
            }
        }

        self.custom_attributes.validate(requirements.has_long_names, allow_sampling, self.data_window)?;
        Ok(())
    }

    /// Read all headers of a file without validating them.
    pub fn read_all(read: &mut PeekRead<impl Read>, version: &Requirements) -> Result<Vec<Header>> {
        if !version.is_multipart() {
            Ok(vec![ Header::read(read, version)? ])
        }
        else {
            let mut headers = Vec::new();

            while !sequence_end::has_come(read)? {
                headers.push(Header::read(read, version)?);
            }

            Ok(headers)
        }
    }

    /// Without validation, write the headers to the byte stream.
    pub fn write_all(headers: &[Header], write: &mut impl Write, is_multipart: bool) -> UnitResult {
        for header in headers {
            header.write(write)?;
        }

        if is_multipart {
            sequence_end::write(write)?;
        }

        Ok(())
    }

    /// Read the value without validating.
    pub fn read(read: &mut PeekRead<impl Read>, requirements: &Requirements) -> Result<Self> {
        let max_string_len = if requirements.has_long_names { LONG_NAME_MAX_LEN + 1 } else { SHORT_NAME_MAX_LEN + 1 };

        // these required attributes will be filled when encountered while parsing
        let mut tiles = None;
        let mut block_type = None;
        let mut chunk_count = None;
        let mut channels = None;
        let mut compression = None;
        let mut data_window = None;
        let mut display_window = None;
        let mut line_order = None;
        let mut pixel_aspect = None;
        let mut screen_window_center = None;
        let mut screen_window_width = None;
        let mut part_name = None;

        let mut custom_attributes = AttributeList::new();

        // read each attribute in this header
        while !sequence_end::has_come(read)? {
            let (attribute_name, value) = attribute::read(read, max_string_len)?;
            let value = value?;

            use crate::meta::header::required_attribute_names as ty;
            use crate::meta::attribute::AttributeValue::*;

            // map each required attribute to its typed field, if the type matches.
            // everything else lands in the open attribute list
            match (attribute_name.bytes(), value) {
                (ty::BLOCK_TYPE, Text(value)) => block_type = Some(attribute::BlockType::parse(value)?),
                (ty::TILES, TileDescription(value)) => tiles = Some(value),
                (ty::CHANNELS, ChannelList(value)) => channels = Some(value),
                (ty::COMPRESSION, Compression(value)) => compression = Some(value),
                (ty::DATA_WINDOW, IntegerBounds(value)) => data_window = Some(value),
                (ty::DISPLAY_WINDOW, IntegerBounds(value)) => display_window = Some(value),
                (ty::LINE_ORDER, LineOrder(value)) => line_order = Some(value),
                (ty::PIXEL_ASPECT, F32(value)) => pixel_aspect = Some(value),
                (ty::WINDOW_CENTER, FloatVec2(value)) => screen_window_center = Some(value),
                (ty::WINDOW_WIDTH, F32(value)) => screen_window_width = Some(value),
                (ty::NAME, Text(value)) => part_name = Some(value),

                (ty::CHUNKS, I32(value)) => chunk_count = Some(
                    i32_to_usize(value, "chunk count")?
                ),

                (_, value) => {
                    custom_attributes.insert(attribute_name, value)?;
                },
            }
        }

        let compression = compression.ok_or(Error::MissingRequiredAttribute("compression"))?;
        let data_window = data_window.ok_or(Error::MissingRequiredAttribute("dataWindow"))?;
        let display_window = display_window.ok_or(Error::MissingRequiredAttribute("displayWindow"))?;
        let channels = channels.ok_or(Error::MissingRequiredAttribute("channels"))?;

        let blocks = match block_type {
            None if requirements.is_single_part_and_tiled => {
                Blocks::Tiles(tiles.ok_or(Error::MissingRequiredAttribute("tiles"))?)
            },

            Some(BlockType::Tile) | Some(BlockType::DeepTile) => {
                Blocks::Tiles(tiles.ok_or(Error::MissingRequiredAttribute("tiles"))?)
            },

            _ => Blocks::ScanLines,
        };

        // check the window now to prevent panics while computing the chunk count
        data_window.validate(None)?;

        let computed_chunk_count = compute_chunk_count(compression, data_window.size, blocks);
        if chunk_count.is_some() && chunk_count != Some(computed_chunk_count) {
            return Err(Error::invalid("chunk count not matching data size"));
        }

        Ok(Header {
            channels, compression, blocks,
            line_order: line_order.unwrap_or(LineOrder::Unspecified),

            data_window, display_window,
            pixel_aspect: pixel_aspect.unwrap_or(1.0),
            screen_window_center: screen_window_center.unwrap_or(Vec2(0.0, 0.0)),
            screen_window_width: screen_window_width.unwrap_or(1.0),

            name: part_name,

            // always compute the chunk count ourselves, never trust the file
            chunk_count: computed_chunk_count,

            deep: block_type == Some(BlockType::DeepScanLine) || block_type == Some(BlockType::DeepTile),
            custom_attributes,
        })
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write(&self, write: &mut impl Write) -> UnitResult {

        macro_rules! write_attributes {
            ( $($name: ident : $variant: ident = $value: expr),* ) => { $(
                attribute::write($name, & $variant ($value .clone()), write)?;
            )* };
        }

        {
            use crate::meta::header::required_attribute_names::*;
            use AttributeValue::*;

            let (block_type, tiles) = match self.blocks {
                Blocks::ScanLines => (attribute::BlockType::ScanLine, None),
                Blocks::Tiles(tiles) => (attribute::BlockType::Tile, Some(tiles)),
            };

            if let Some(tiles) = tiles {
                attribute::write(TILES, &TileDescription(tiles), write)?;
            }

            if let Some(name) = &self.name {
                attribute::write(NAME, &Text(name.clone()), write)?;
            }

            // the chunk count is not strictly required for single-part files,
            // but this library always writes it
            attribute::write(CHUNKS, &I32(usize_to_i32(self.chunk_count, "chunk count")?), write)?;

            write_attributes!(
                BLOCK_TYPE: BlockType = &block_type,
                CHANNELS: ChannelList = &self.channels,
                COMPRESSION: Compression = &self.compression,
                LINE_ORDER: LineOrder = &self.line_order,
                DATA_WINDOW: IntegerBounds = &self.data_window,
                DISPLAY_WINDOW: IntegerBounds = &self.display_window,
                PIXEL_ASPECT: F32 = &self.pixel_aspect,
                WINDOW_CENTER: FloatVec2 = &self.screen_window_center,
                WINDOW_WIDTH: F32 = &self.screen_window_width
            );
        }

        self.custom_attributes.write(write)?;

        sequence_end::write(write)?;
        Ok(())
    }

    /// The exact number of bytes this header will consume when written,
    /// including the trailing sequence end byte.
    pub fn byte_size(&self) -> usize {
        use crate::meta::header::required_attribute_names::*;
        use AttributeValue::*;

        let mut size = 0;

        if let Blocks::Tiles(tiles) = self.blocks {
            size += attribute::byte_size(&attribute::Text::from_static(TILES), &TileDescription(tiles));
        }

        if let Some(name) = &self.name {
            size += attribute::byte_size(&attribute::Text::from_static(NAME), &Text(name.clone()));
        }

        let block_type = match self.blocks {
            Blocks::ScanLines => attribute::BlockType::ScanLine,
            Blocks::Tiles(_) => attribute::BlockType::Tile,
        };

        size += attribute::byte_size(&attribute::Text::from_static(CHUNKS), &I32(0));
        size += attribute::byte_size(&attribute::Text::from_static(BLOCK_TYPE), &BlockType(block_type));
        size += attribute::byte_size(&attribute::Text::from_static(CHANNELS), &ChannelList(self.channels.clone()));
        size += attribute::byte_size(&attribute::Text::from_static(COMPRESSION), &Compression(self.compression));
        size += attribute::byte_size(&attribute::Text::from_static(LINE_ORDER), &LineOrder(self.line_order));
        size += attribute::byte_size(&attribute::Text::from_static(DATA_WINDOW), &IntegerBounds(self.data_window));
        size += attribute::byte_size(&attribute::Text::from_static(DISPLAY_WINDOW), &IntegerBounds(self.display_window));
        size += attribute::byte_size(&attribute::Text::from_static(PIXEL_ASPECT), &F32(0.0));
        size += attribute::byte_size(&attribute::Text::from_static(WINDOW_CENTER), &FloatVec2(Vec2(0.0, 0.0)));
        size += attribute::byte_size(&attribute::Text::from_static(WINDOW_WIDTH), &F32(0.0));

        size += self.custom_attributes.byte_size();
        size += sequence_end::byte_size();
        size
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn rgb_channels() -> ChannelList {
        let mut channels = ChannelList::empty();
        channels.insert(ChannelDescription::named("R", SampleType::F16)).unwrap();
        channels.insert(ChannelDescription::named("G", SampleType::F16)).unwrap();
        channels.insert(ChannelDescription::named("B", SampleType::F16)).unwrap();
        channels
    }

    #[test]
    fn attribute_list_insert_find_remove() {
        let mut list = AttributeList::new();
        list.insert(Text::from("comments"), AttributeValue::Text(Text::from("what a nice day"))).unwrap();
        list.insert(Text::from("focus"), AttributeValue::F32(7.5)).unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list.find(&Text::from("focus")).unwrap().to_f32().unwrap(), 7.5);

        // duplicate insert fails and does not modify the list
        let duplicate = list.insert(Text::from("focus"), AttributeValue::F32(1.0));
        assert!(matches!(duplicate, Err(Error::Invalid(_))));
        assert_eq!(list.len(), 2);

        // type mismatch on the typed getter
        let mismatch = list.find(&Text::from("focus")).unwrap().to_text();
        assert!(matches!(mismatch, Err(Error::AttributeTypeMismatch { expected: "string", found: "float" })));

        // removing twice fails the second time
        let removed = list.remove(&Text::from("focus")).unwrap();
        assert_eq!(removed.value, AttributeValue::F32(7.5));
        assert!(matches!(list.remove(&Text::from("focus")), Err(Error::NoAttributeByName(_))));

        assert!(matches!(list.find(&Text::from("nope")), Err(Error::NoAttributeByName(_))));
    }

    #[test]
    fn attribute_list_byte_size_matches_write() {
        let mut list = AttributeList::new();
        list.insert(Text::from("owner"), AttributeValue::Text(Text::from("me"))).unwrap();
        list.insert(Text::from("fStop"), AttributeValue::F32(8.0)).unwrap();
        list.insert(Text::from("bounds"), AttributeValue::IntegerBounds(IntegerBounds::from_dimensions(Vec2(12, 34)))).unwrap();

        let mut bytes = Vec::new();
        list.write(&mut bytes).unwrap();
        assert_eq!(list.byte_size(), bytes.len());
    }

    #[test]
    fn attribute_list_insert_by_type_name() {
        let mut list = AttributeList::new();

        // a built-in type name is parsed into its typed value
        let mut float_bytes = Vec::new();
        3.25_f32.write(&mut float_bytes).unwrap();
        list.insert_by_type_name(Text::from("aperture"), Text::from("float"), float_bytes, None).unwrap();
        assert_eq!(list.find(&Text::from("aperture")).unwrap().to_f32().unwrap(), 3.25);

        // an unknown type name is stored as opaque bytes
        list.insert_by_type_name(Text::from("weird"), Text::from("customtype"), vec![1, 2, 3], None).unwrap();
        let opaque = list.find(&Text::from("weird")).unwrap().to_opaque().unwrap();
        assert_eq!(opaque.kind, Text::from("customtype"));
        assert_eq!(opaque.packed_bytes().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn header_byte_size_matches_write() {
        let mut header = Header::new(
            IntegerBounds::from_dimensions(Vec2(640, 480)),
            rgb_channels(),
        ).with_encoding(Compression::ZIP16, LineOrder::Increasing);

        header.custom_attributes.insert(Text::from("comments"), AttributeValue::Text(Text::from("hello"))).unwrap();

        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();
        assert_eq!(header.byte_size(), bytes.len());
    }

    #[test]
    fn header_round_trip() {
        let mut header = Header::new(
            IntegerBounds::new(Vec2(3, -5), Vec2(2000, 333)),
            rgb_channels(),
        ).with_encoding(Compression::RLE, LineOrder::Increasing);

        header.custom_attributes.insert(Text::from("owner"), AttributeValue::Text(Text::from("somebody"))).unwrap();

        let requirements = Requirements::new(false, false);
        header.validate(&requirements).unwrap();

        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();

        let decoded = Header::read(&mut PeekRead::new(bytes.as_slice()), &requirements).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn tiled_header_round_trip() {
        let header = Header::new(
            IntegerBounds::from_dimensions(Vec2(321, 321)),
            rgb_channels(),
        ).with_tiles(TileDescription {
            tile_size: Vec2(32, 32),
            level_mode: LevelMode::Singular,
            rounding_mode: RoundingMode::Down,
        });

        assert_eq!(header.chunk_count, 11 * 11);

        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();

        let decoded = Header::read(&mut PeekRead::new(bytes.as_slice()), &Requirements::new(false, false)).unwrap();
        assert_eq!(header, decoded);
        assert!(decoded.has_tiles());
    }

    #[test]
    fn scan_line_block_coordinates() {
        let header = Header::new(
            IntegerBounds::new(Vec2(0, 16), Vec2(64, 64)),
            rgb_channels(),
        ).with_encoding(Compression::ZIP16, LineOrder::Increasing);

        let block = header.get_scan_line_block_coordinates(32).unwrap();
        assert_eq!(block.tile_index, Vec2(0, 1));

        assert!(matches!(
            header.get_scan_line_block_coordinates(-30),
            Err(Error::Invalid(_))
        ));

        let tiled = header.with_tiles(TileDescription {
            tile_size: Vec2(16, 16),
            level_mode: LevelMode::Singular,
            rounding_mode: RoundingMode::Down,
        });

        assert!(matches!(
            tiled.get_scan_line_block_coordinates(32),
            Err(Error::ScanLineApiOnTiledPart)
        ));
    }

    #[test]
    fn last_tile_is_clipped_to_data_window() {
        let header = Header::new(
            IntegerBounds::from_dimensions(Vec2(321, 321)),
            rgb_channels(),
        ).with_tiles(TileDescription {
            tile_size: Vec2(32, 32),
            level_mode: LevelMode::Singular,
            rounding_mode: RoundingMode::Down,
        });

        let blocks: Vec<TileIndices> = header.blocks_increasing_y_order().collect();
        assert_eq!(blocks.len(), header.chunk_count);

        assert_eq!(blocks.first().unwrap().size, Vec2(32, 32));
        assert_eq!(blocks.last().unwrap().size, Vec2(1, 1)); // 321 = 10 * 32 + 1

        // a tile in the last column but not the last row only clips horizontally
        let last_of_first_row = &blocks[10];
        assert_eq!(last_of_first_row.location.tile_index, Vec2(10, 0));
        assert_eq!(last_of_first_row.size, Vec2(1, 32));
    }

    #[test]
    fn chunk_index_follows_enumeration_order() {
        let header = Header::new(
            IntegerBounds::from_dimensions(Vec2(100, 100)),
            rgb_channels(),
        ).with_tiles(TileDescription {
            tile_size: Vec2(32, 32),
            level_mode: LevelMode::Singular,
            rounding_mode: RoundingMode::Down,
        });

        let second_row_first_tile = TileCoordinates { tile_index: Vec2(0, 1), level_index: Vec2(0, 0) };
        assert_eq!(header.chunk_index_of(second_row_first_tile).unwrap(), 4); // 4 tiles per row

        let out_of_range = TileCoordinates { tile_index: Vec2(99, 99), level_index: Vec2(0, 0) };
        assert!(header.chunk_index_of(out_of_range).is_err());
    }
}
