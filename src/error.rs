
//! Error type for everything that can go wrong
//! while reading, writing, or defining an exr file.

use std::borrow::Cow;
use std::convert::TryFrom;
use std::fmt;
use std::io::Error as IoError;

/// A result that, if successful, contains the value, otherwise an exr error.
pub type Result<T> = std::result::Result<T, Error>;

/// A result that contains no value on success.
pub type UnitResult = Result<()>;

/// An error that occurred while reading, writing, or defining an exr file.
/// Every fallible operation in this crate returns one of these;
/// there is no panicking control flow in library code.
#[derive(Debug)]
pub enum Error {

    /// A parameter or file content did not meet a documented requirement,
    /// for example a negative size, a duplicate name, or an
    /// out-of-range chunk coordinate.
    Invalid(Cow<'static, str>),

    /// The file or the requested operation uses a feature this crate
    /// recognizes but does not implement, for example one of the
    /// lossy compression methods.
    NotSupported(Cow<'static, str>),

    /// A length declared in the file would require an unreasonable
    /// allocation. Raised before the allocation is attempted.
    OutOfMemory(Cow<'static, str>),

    /// The underlying stream failed while reading,
    /// or delivered fewer bytes than the file declares.
    ReadIo(IoError),

    /// The underlying stream failed while writing,
    /// or accepted fewer bytes than were issued.
    WriteIo(IoError),

    /// An attribute or channel name exceeds the active length bound
    /// (31 bytes, unless the context has long names enabled).
    NameTooLong(Cow<'static, str>),

    /// No attribute with the requested name exists in the list.
    NoAttributeByName(String),

    /// An attribute exists under this name, but holds a different kind
    /// of value than the caller asked for.
    AttributeTypeMismatch {
        /// The kind the caller requested.
        expected: &'static str,
        /// The kind actually stored under the name.
        found: &'static str,
    },

    /// `write_header` was called while a mandatory attribute
    /// is still missing from a part.
    MissingRequiredAttribute(&'static str),

    /// A tile-specific operation was invoked on a scan line part.
    TileApiOnScanLinePart,

    /// A scan line operation was invoked on a tiled part.
    ScanLineApiOnTiledPart,

    /// An index, such as a part number, is outside the valid range.
    ArgumentOutOfRange(Cow<'static, str>),

    /// The file does not begin with a valid magic number and version field.
    BadHeader(Cow<'static, str>),

    /// The operation requires a context that was opened for reading.
    NotOpenForReading,

    /// The operation requires a write context in the appropriate phase,
    /// for example writing chunks before the header was committed.
    NotOpenForWriting,

    /// The header was already committed to the stream
    /// and can no longer be modified.
    HeaderAlreadyWritten,
}

impl Error {

    /// Create an error declaring that some file content or argument
    /// did not meet its requirements.
    pub(crate) fn invalid(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Invalid(message.into())
    }

    /// Create an error declaring that a recognized feature is not implemented.
    pub(crate) fn unsupported(message: impl Into<Cow<'static, str>>) -> Self {
        Error::NotSupported(message.into())
    }

    /// Wrap a stream error that occurred while reading.
    pub(crate) fn read_io(error: IoError) -> Self {
        Error::ReadIo(error)
    }

    /// Wrap a stream error that occurred while writing.
    pub(crate) fn write_io(error: IoError) -> Self {
        Error::WriteIo(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Invalid(message) => write!(formatter, "invalid: {}", message),
            Error::NotSupported(message) => write!(formatter, "not supported: {}", message),
            Error::OutOfMemory(message) => write!(formatter, "allocation too large: {}", message),
            Error::ReadIo(error) => write!(formatter, "read error: {}", error),
            Error::WriteIo(error) => write!(formatter, "write error: {}", error),
            Error::NameTooLong(name) => write!(formatter, "name too long: `{}`", name),
            Error::NoAttributeByName(name) => write!(formatter, "no attribute named `{}`", name),

            Error::AttributeTypeMismatch { expected, found } => write!(
                formatter, "attribute type mismatch: requested {}, but found {}", expected, found
            ),

            Error::MissingRequiredAttribute(name) =>
                write!(formatter, "missing required attribute `{}`", name),

            Error::TileApiOnScanLinePart =>
                write!(formatter, "tile operation called on a scan line part"),

            Error::ScanLineApiOnTiledPart =>
                write!(formatter, "scan line operation called on a tiled part"),

            Error::ArgumentOutOfRange(message) =>
                write!(formatter, "argument out of range: {}", message),

            Error::BadHeader(message) => write!(formatter, "invalid file header: {}", message),
            Error::NotOpenForReading => write!(formatter, "context is not open for reading"),
            Error::NotOpenForWriting => write!(formatter, "context is not in the chunk writing phase"),
            Error::HeaderAlreadyWritten => write!(formatter, "header was already written"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ReadIo(error) | Error::WriteIo(error) => Some(error),
            _ => None,
        }
    }
}


/// Convert an `i32` from the file into a `usize` for indexing,
/// failing for negative values.
pub(crate) fn i32_to_usize(value: i32, error_message: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::invalid(error_message))
}

/// Convert a `u64` file offset into a `usize`,
/// failing on 32 bit machines for values above the address space.
pub(crate) fn u64_to_usize(value: u64, error_message: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::invalid(error_message))
}

/// Convert a size into an `i32` for serialization,
/// failing for values above the 31 bit bound of the format.
pub(crate) fn usize_to_i32(value: usize, error_message: &'static str) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::invalid(error_message))
}

/// Convert a size into a `u64` file offset. Infallible on all supported machines.
pub(crate) fn usize_to_u64(value: usize) -> u64 {
    value as u64
}
