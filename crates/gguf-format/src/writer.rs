//! GGUF file writer.
//!
//! Metadata and tensors are collected first; [`GGUFWriter::finalize`] then
//! lays out the offsets and streams header, index, padding and payloads to
//! the sink in one pass.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{GGUFError, Result};
use crate::metadata::{MetadataStore, check_alignment};
use crate::tensor::{TensorDescriptor, TensorTable};
use crate::types::*;
use crate::value::{self, Value, write_string};

/// What [`GGUFWriter::finalize`] produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub tensor_count: u64,
    pub metadata_count: u64,
    pub alignment: u32,
    /// Absolute offset of the tensor data region.
    pub data_offset: u64,
    pub total_bytes: u64,
}

pub struct GGUFWriter<W: Write> {
    sink: W,
    metadata: MetadataStore,
    tensors: TensorTable,
    payloads: Vec<Vec<u8>>,
    finalized: bool,
}

impl GGUFWriter<BufWriter<File>> {
    /// Create (or truncate) `path` and write a model called `model_name`.
    pub fn create(path: impl AsRef<Path>, model_name: &str) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Self::new(BufWriter::new(file), model_name)
    }
}

impl<W: Write> GGUFWriter<W> {
    /// Start a file whose `general.name` is `model_name`.
    pub fn new(sink: W, model_name: &str) -> Result<Self> {
        let mut metadata = MetadataStore::new();
        metadata.insert(KEY_NAME, model_name)?;
        Self::with_metadata(sink, metadata)
    }

    /// Start from an already populated metadata store.
    pub fn with_metadata(sink: W, metadata: MetadataStore) -> Result<Self> {
        metadata.alignment()?;
        Ok(Self {
            sink,
            metadata,
            tensors: TensorTable::new(),
            payloads: Vec::new(),
            finalized: false,
        })
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.ensure_open()?;
        let key = key.into();
        let value = value.into();
        if key == KEY_ALIGNMENT {
            check_alignment(&value)?;
        }
        self.metadata.insert(key, value)
    }

    /// Queue a tensor. `data` must be exactly the size implied by `shape`
    /// and `tensor_type`; its contents are not interpreted.
    pub fn add_tensor(
        &mut self,
        name: impl Into<String>,
        shape: &[u64],
        tensor_type: TensorType,
        data: impl Into<Vec<u8>>,
    ) -> Result<()> {
        self.ensure_open()?;
        let data = data.into();
        self.tensors.add(TensorDescriptor {
            name: name.into(),
            shape: shape.to_vec(),
            tensor_type,
            offset: 0,
            size: data.len() as u64,
        })?;
        self.payloads.push(data);
        Ok(())
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn tensors(&self) -> &TensorTable {
        &self.tensors
    }

    /// Serialize everything to the sink and flush it.
    ///
    /// One-shot: later calls, and any further `set_metadata`/`add_tensor`,
    /// fail with [`GGUFError::AlreadyFinalized`]. If this returns an error
    /// the sink holds a partial, unusable file.
    pub fn finalize(&mut self) -> Result<WriteSummary> {
        self.ensure_open()?;
        self.finalized = true;

        let alignment = self.metadata.alignment()?;
        let data_size = self.tensors.assign_offsets(alignment);
        let payloads = std::mem::take(&mut self.payloads);

        let mut out = CountingWriter {
            inner: &mut self.sink,
            written: 0,
        };
        let data_offset = write_index(&mut out, &self.metadata, &self.tensors, alignment)
            .and_then(|data_offset| {
                write_payloads(&mut out, &self.tensors, &payloads, alignment)?;
                out.flush()?;
                Ok(data_offset)
            })
            .map_err(GGUFError::IncompleteWrite)?;

        let summary = WriteSummary {
            tensor_count: self.tensors.len() as u64,
            metadata_count: self.metadata.len() as u64,
            alignment,
            data_offset,
            total_bytes: out.written,
        };
        debug_assert_eq!(summary.total_bytes, data_offset + data_size);
        debug!(
            tensors = summary.tensor_count,
            metadata = summary.metadata_count,
            bytes = summary.total_bytes,
            "wrote GGUF file"
        );
        Ok(summary)
    }

    /// Give back the sink, e.g. to recover an in-memory buffer.
    pub fn into_inner(self) -> W {
        self.sink
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finalized {
            Err(GGUFError::AlreadyFinalized)
        } else {
            Ok(())
        }
    }
}

//  Serialization steps

/// Header, metadata, descriptors and the padding after them. Returns the
/// absolute offset of the data region.
fn write_index<W: Write>(
    out: &mut CountingWriter<W>,
    metadata: &MetadataStore,
    tensors: &TensorTable,
    alignment: u32,
) -> io::Result<u64> {
    out.write_all(&GGUF_MAGIC)?;
    out.write_all(&GGUF_VERSION_MAX.to_le_bytes())?;
    out.write_all(&(tensors.len() as u64).to_le_bytes())?;
    out.write_all(&(metadata.len() as u64).to_le_bytes())?;

    for (key, value) in metadata.iter() {
        write_string(out, key)?;
        out.write_all(&(value.value_type() as u32).to_le_bytes())?;
        value::encode(value, out)?;
    }

    for d in tensors.iter() {
        trace!(name = %d.name, offset = d.offset, size = d.size, "tensor descriptor");
        write_string(out, &d.name)?;
        out.write_all(&(d.shape.len() as u32).to_le_bytes())?;
        for dim in &d.shape {
            out.write_all(&dim.to_le_bytes())?;
        }
        out.write_all(&(d.tensor_type as u32).to_le_bytes())?;
        out.write_all(&d.offset.to_le_bytes())?;
    }

    pad_to(out, alignment)?;
    Ok(out.written)
}

/// Payloads in descriptor order, each followed by zero padding up to the
/// next alignment boundary.
fn write_payloads<W: Write>(
    out: &mut CountingWriter<W>,
    tensors: &TensorTable,
    payloads: &[Vec<u8>],
    alignment: u32,
) -> io::Result<()> {
    for (d, bytes) in tensors.iter().zip(payloads) {
        debug_assert_eq!(d.size, bytes.len() as u64);
        out.write_all(bytes)?;
        pad_to(out, alignment)?;
    }
    Ok(())
}

fn pad_to<W: Write>(out: &mut CountingWriter<W>, alignment: u32) -> io::Result<()> {
    let padding = align_up(out.written, u64::from(alignment)) - out.written;
    io::copy(&mut io::repeat(0).take(padding), out)?;
    Ok(())
}

/// Tracks the absolute position in the output for padding computations.
struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn writer() -> GGUFWriter<Vec<u8>> {
        GGUFWriter::new(Vec::new(), "xor-model").unwrap()
    }

    #[test]
    fn model_name_is_first_metadata_entry() {
        let w = writer();
        assert_eq!(w.metadata().get_str(KEY_NAME), Some("xor-model"));
        assert_eq!(w.metadata().len(), 1);
    }

    #[test]
    fn header_layout() {
        let mut w = writer();
        w.add_tensor("fc1.bias", &[2], TensorType::F32, vec![0u8; 8])
            .unwrap();
        let summary = w.finalize().unwrap();
        let bytes = w.into_inner();
        assert_eq!(&bytes[..4], b"GGUF");
        assert_eq!(&bytes[4..8], &3u32.to_le_bytes());
        assert_eq!(&bytes[8..16], &1u64.to_le_bytes());
        assert_eq!(&bytes[16..24], &1u64.to_le_bytes());
        assert_eq!(summary.total_bytes, bytes.len() as u64);
        assert_eq!(summary.data_offset % 32, 0);
        // 8 payload bytes padded to a full alignment unit
        assert_eq!(bytes.len() as u64, summary.data_offset + 32);
    }

    #[test]
    fn finalize_is_one_shot() {
        let mut w = writer();
        w.finalize().unwrap();
        assert_eq!(w.finalize().unwrap_err().kind(), ErrorKind::AlreadyFinalized);
        assert_eq!(
            w.set_metadata("late", 1u8).unwrap_err().kind(),
            ErrorKind::AlreadyFinalized
        );
        assert_eq!(
            w.add_tensor("late", &[1], TensorType::I8, vec![0u8])
                .unwrap_err()
                .kind(),
            ErrorKind::AlreadyFinalized
        );
    }

    #[test]
    fn rejects_duplicates_and_bad_sizes() {
        let mut w = writer();
        assert_eq!(
            w.set_metadata(KEY_NAME, "again").unwrap_err().kind(),
            ErrorKind::DuplicateKey
        );
        w.add_tensor("w", &[2, 2], TensorType::F32, vec![0u8; 16])
            .unwrap();
        assert_eq!(
            w.add_tensor("w", &[1], TensorType::F32, vec![0u8; 4])
                .unwrap_err()
                .kind(),
            ErrorKind::DuplicateTensorName
        );
        assert_eq!(
            w.add_tensor("v", &[2, 2], TensorType::F32, vec![0u8; 15])
                .unwrap_err()
                .kind(),
            ErrorKind::SizeMismatch
        );
        assert_eq!(
            w.add_tensor("z", &[0], TensorType::F32, Vec::new())
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidShape
        );
        assert_eq!(w.tensors().len(), 1);
    }

    #[test]
    fn rejects_invalid_alignment_override() {
        let mut w = writer();
        let err = w.set_metadata(KEY_ALIGNMENT, 24u32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAlignment);
        assert!(!w.metadata().contains_key(KEY_ALIGNMENT));
        let err = w.set_metadata(KEY_ALIGNMENT, 64u64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAlignment);
        w.set_metadata(KEY_ALIGNMENT, 64u32).unwrap();
    }

    struct FullDisk {
        capacity: usize,
        written: Vec<u8>,
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.capacity - self.written.len();
            if room == 0 {
                return Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"));
            }
            let n = buf.len().min(room);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sink_failure_is_incomplete_write() {
        let sink = FullDisk {
            capacity: 40,
            written: Vec::new(),
        };
        let mut w = GGUFWriter::new(sink, "xor-model").unwrap();
        w.add_tensor("w", &[64], TensorType::F32, vec![1u8; 256])
            .unwrap();
        let err = w.finalize().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompleteWrite);
        assert_eq!(w.finalize().unwrap_err().kind(), ErrorKind::AlreadyFinalized);
    }
}
