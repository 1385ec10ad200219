use thiserror::Error;

use crate::reader::ReaderState;

/// Coarse classification of a [`GGUFError`], independent of any offset
/// context the reader attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    BadMagic,
    UnsupportedVersion,
    MalformedValue,
    DuplicateKey,
    DuplicateTensorName,
    InvalidShape,
    SizeMismatch,
    InvalidAlignment,
    CorruptLayout,
    TruncatedFile,
    UnknownTensor,
    IncompleteWrite,
    AlreadyFinalized,
}

#[derive(Error, Debug)]
pub enum GGUFError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid GGUF magic: {found:02X?}")]
    BadMagic { found: [u8; 4] },

    #[error("Unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),

    #[error("Malformed value: {0}")]
    MalformedValue(String),

    #[error("Duplicate metadata key '{0}'")]
    DuplicateKey(String),

    #[error("Duplicate tensor name '{0}'")]
    DuplicateTensorName(String),

    #[error("Invalid shape {shape:?} for tensor '{name}'")]
    InvalidShape { name: String, shape: Vec<u64> },

    #[error("Tensor '{name}' holds {actual} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid alignment {0} (must be a non-zero power of two)")]
    InvalidAlignment(u64),

    #[error("Corrupt layout: {0}")]
    CorruptLayout(String),

    #[error("Truncated file: needed {needed} bytes at offset {offset}, only {available} available")]
    TruncatedFile {
        offset: u64,
        needed: u64,
        available: u64,
    },

    #[error("Unknown tensor '{0}'")]
    UnknownTensor(String),

    #[error("Incomplete write: {0}")]
    IncompleteWrite(#[source] std::io::Error),

    #[error("Writer already finalized")]
    AlreadyFinalized,

    #[error("at byte {offset}: {source}")]
    At {
        offset: u64,
        #[source]
        source: Box<GGUFError>,
    },

    #[error("{source} (parse reached {reached:?})")]
    Rejected {
        reached: ReaderState,
        #[source]
        source: Box<GGUFError>,
    },
}

impl GGUFError {
    /// The failure class, looking through any offset context.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::BadMagic { .. } => ErrorKind::BadMagic,
            Self::UnsupportedVersion(_) => ErrorKind::UnsupportedVersion,
            Self::MalformedValue(_) => ErrorKind::MalformedValue,
            Self::DuplicateKey(_) => ErrorKind::DuplicateKey,
            Self::DuplicateTensorName(_) => ErrorKind::DuplicateTensorName,
            Self::InvalidShape { .. } => ErrorKind::InvalidShape,
            Self::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Self::InvalidAlignment(_) => ErrorKind::InvalidAlignment,
            Self::CorruptLayout(_) => ErrorKind::CorruptLayout,
            Self::TruncatedFile { .. } => ErrorKind::TruncatedFile,
            Self::UnknownTensor(_) => ErrorKind::UnknownTensor,
            Self::IncompleteWrite(_) => ErrorKind::IncompleteWrite,
            Self::AlreadyFinalized => ErrorKind::AlreadyFinalized,
            Self::At { source, .. } | Self::Rejected { source, .. } => source.kind(),
        }
    }

    /// Byte offset of the record that failed to parse, if known.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::At { offset, .. } => Some(*offset),
            Self::TruncatedFile { offset, .. } => Some(*offset),
            Self::Rejected { source, .. } => source.offset(),
            _ => None,
        }
    }

    /// Attach the start offset of the record being parsed. Errors that
    /// already carry a location are left alone.
    pub(crate) fn at(self, offset: u64) -> Self {
        match self {
            Self::At { .. } | Self::Rejected { .. } => self,
            other => Self::At {
                offset,
                source: Box::new(other),
            },
        }
    }

    /// Last reader state entered before the input was rejected.
    pub fn reached_state(&self) -> Option<ReaderState> {
        match self {
            Self::Rejected { reached, .. } => Some(*reached),
            _ => None,
        }
    }

    pub(crate) fn rejected(self, reached: ReaderState) -> Self {
        Self::Rejected {
            reached,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, GGUFError>;
