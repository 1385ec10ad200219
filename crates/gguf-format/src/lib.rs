//! Pure-Rust GGUF format engine.
//!
//! Reads and writes the GGUF model container: a versioned header, an
//! ordered set of typed metadata entries, a tensor index and the aligned
//! tensor payloads.
//!
//! * [`GGUFReader`] parses the index of a memory-mapped file (or any byte
//!   buffer) and lends out tensor payloads as borrowed slices, so even
//!   multi-gigabyte models can be inspected without loading them.
//! * [`GGUFWriter`] collects metadata and opaque tensor bytes, computes the
//!   aligned layout and streams the file to any `Write` sink.
//!
//! Quantized payloads are never decoded; a tensor's element type only
//! decides how many bytes its shape occupies.

pub mod error;
pub mod metadata;
pub mod reader;
pub mod tensor;
pub mod types;
pub mod value;
pub mod writer;

pub use error::{ErrorKind, GGUFError, Result};
pub use metadata::MetadataStore;
pub use reader::{GGUFHeader, GGUFReader, ReaderState, TensorView};
pub use tensor::{TensorDescriptor, TensorTable};
pub use types::{
    GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC, GGUF_VERSION_MAX, GGUF_VERSION_MIN, GGUFValueType,
    KEY_ALIGNMENT, KEY_NAME, MAX_DIMS, TensorType, align_up,
};
pub use value::{Value, ValueArray};
pub use writer::{GGUFWriter, WriteSummary};
