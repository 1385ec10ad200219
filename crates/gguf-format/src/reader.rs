//! GGUF file reader.
//!
//! The header, metadata and tensor index are parsed eagerly, front to back,
//! when the reader is constructed.  Tensor payloads are never copied:
//! [`GGUFReader::tensor_bytes`] hands out slices of the underlying source,
//! which for files is a read-only memory map.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{GGUFError, Result};
use crate::metadata::MetadataStore;
use crate::tensor::{TensorDescriptor, TensorTable};
use crate::types::*;
use crate::value::{self, Value, read_string, read_u32, read_u64, take};

/// Smallest possible metadata entry: empty key, tag, one-byte value.
const MIN_KV_LEN: u64 = 8 + 4 + 1;

/// Smallest possible tensor descriptor: empty name, one dimension.
const MIN_DESCRIPTOR_LEN: u64 = 8 + 4 + 8 + 4 + 8;

//  Public types

/// Parse progress. A constructed reader is always [`ReaderState::Ready`];
/// a rejected input reports the last state it reached through
/// [`GGUFError::reached_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Unopened,
    HeaderValidated,
    MetadataLoaded,
    DescriptorsLoaded,
    Ready,
    Invalid,
}

/// Fixed-size file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GGUFHeader {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_count: u64,
}

/// A tensor descriptor together with a borrowed view of its payload.
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
    pub descriptor: &'a TensorDescriptor,
    /// Absolute byte offset of the payload within the source.
    pub file_offset: u64,
    pub data: &'a [u8],
}

/// A reader over any in-memory or memory-mapped GGUF byte source.
pub struct GGUFReader<S = Mmap> {
    source: S,
    header: GGUFHeader,
    metadata: MetadataStore,
    tensors: TensorTable,
    alignment: u32,
    data_offset: u64,
}

impl GGUFReader<Mmap> {
    /// Memory-map `path` and parse it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and never handed out mutably.
        // Concurrent truncation of the file by another process is outside
        // what any mmap-based reader can guard against.
        let mmap = unsafe { Mmap::map(&file)? };
        debug!(path = %path.display(), size = mmap.len(), "mapped GGUF file");
        Self::new(mmap)
    }
}

impl<S: AsRef<[u8]>> GGUFReader<S> {
    /// Parse the header, metadata and tensor index of `source`.
    pub fn new(source: S) -> Result<Self> {
        let mut parser = Parser::new(source.as_ref());
        let parsed = parser.run();
        if let Err(ref e) = parsed {
            warn!(
                state = ?parser.state,
                reached = ?parser.reached,
                offset = ?e.offset(),
                error = %e,
                "rejected GGUF input"
            );
        }
        let (header, metadata, tensors, alignment, data_offset) =
            parsed.map_err(|e| e.rejected(parser.reached))?;
        Ok(Self {
            source,
            header,
            metadata,
            tensors,
            alignment,
            data_offset,
        })
    }

    pub fn state(&self) -> ReaderState {
        ReaderState::Ready
    }

    pub fn header(&self) -> &GGUFHeader {
        &self.header
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    /// Payload alignment in effect for this file.
    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    /// Absolute offset of the tensor data region.
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn tensors(&self) -> &TensorTable {
        &self.tensors
    }

    /// Metadata entries in file order.
    pub fn list_metadata(&self) -> Vec<(&str, &Value)> {
        self.metadata.iter().collect()
    }

    /// Tensor descriptors in file order.
    pub fn list_tensors(&self) -> &[TensorDescriptor] {
        self.tensors.as_slice()
    }

    /// Total length of the underlying source.
    pub fn source_len(&self) -> u64 {
        self.source.as_ref().len() as u64
    }

    /// Borrow the payload of tensor `name`.
    pub fn tensor_bytes(&self, name: &str) -> Result<&[u8]> {
        Ok(self.tensor(name)?.data)
    }

    pub fn tensor(&self, name: &str) -> Result<TensorView<'_>> {
        let descriptor = self
            .tensors
            .get(name)
            .ok_or_else(|| GGUFError::UnknownTensor(name.to_owned()))?;
        let data = self.source.as_ref();
        let available = data.len() as u64;
        let start = self.data_offset.saturating_add(descriptor.offset);
        let end = start.saturating_add(descriptor.size);
        if end > available {
            return Err(GGUFError::TruncatedFile {
                offset: start,
                needed: descriptor.size,
                available: available.saturating_sub(start),
            });
        }
        Ok(TensorView {
            descriptor,
            file_offset: start,
            data: &data[start as usize..end as usize],
        })
    }
}

//  Parser

type Parsed = (GGUFHeader, MetadataStore, TensorTable, u32, u64);

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
    state: ReaderState,
    /// Last state entered successfully.
    reached: ReaderState,
    /// Start of the `general.alignment` entry, if one was read.
    alignment_entry: Option<u64>,
}

impl<'a> Parser<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            state: ReaderState::Unopened,
            reached: ReaderState::Unopened,
            alignment_entry: None,
        }
    }

    fn run(&mut self) -> Result<Parsed> {
        let header = self.step(ReaderState::HeaderValidated, Self::read_header)?;
        let metadata = self.step(ReaderState::MetadataLoaded, |p| {
            p.read_metadata(header.metadata_count)
        })?;
        let alignment = metadata.alignment().map_err(|e| {
            self.state = ReaderState::Invalid;
            GGUFError::CorruptLayout(e.to_string()).at(self.alignment_entry.unwrap_or(0))
        })?;
        let tensors = self.step(ReaderState::DescriptorsLoaded, |p| {
            p.read_descriptors(header.tensor_count, alignment)
        })?;
        let data_offset = self.step(ReaderState::Ready, |p| p.skip_padding(alignment))?;

        debug!(
            version = header.version,
            tensors = tensors.len(),
            metadata = metadata.len(),
            alignment,
            data_offset,
            "parsed GGUF index"
        );
        Ok((header, metadata, tensors, alignment, data_offset))
    }

    fn step<T>(&mut self, next: ReaderState, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        match f(self) {
            Ok(v) => {
                self.state = next;
                self.reached = next;
                Ok(v)
            }
            Err(e) => {
                self.state = ReaderState::Invalid;
                Err(e)
            }
        }
    }

    fn remaining(&self) -> u64 {
        (self.data.len() - self.pos) as u64
    }

    fn read_header(&mut self) -> Result<GGUFHeader> {
        let magic = take(self.data, &mut self.pos, GGUF_MAGIC.len())?;
        if magic != GGUF_MAGIC.as_slice() {
            let mut found = [0u8; 4];
            found.copy_from_slice(magic);
            return Err(GGUFError::BadMagic { found }.at(0));
        }

        let version = read_u32(self.data, &mut self.pos)?;
        if !(GGUF_VERSION_MIN..=GGUF_VERSION_MAX).contains(&version) {
            return Err(GGUFError::UnsupportedVersion(version).at(4));
        }

        let tensor_count = read_u64(self.data, &mut self.pos)?;
        let metadata_count = read_u64(self.data, &mut self.pos)?;

        Ok(GGUFHeader {
            version,
            tensor_count,
            metadata_count,
        })
    }

    fn read_metadata(&mut self, count: u64) -> Result<MetadataStore> {
        self.check_count(count, MIN_KV_LEN, "metadata entries")?;

        let mut store = MetadataStore::new();
        for _ in 0..count {
            let start = self.pos;
            self.read_kv(&mut store).map_err(|e| e.at(start as u64))?;
        }
        Ok(store)
    }

    fn read_kv(&mut self, store: &mut MetadataStore) -> Result<()> {
        let start = self.pos;
        let key = read_string(self.data, &mut self.pos)?;
        let tag = GGUFValueType::try_from(read_u32(self.data, &mut self.pos)?)?;
        let value = value::decode(tag, self.data, &mut self.pos)?;
        trace!(%key, ?tag, "metadata entry");
        if key == KEY_ALIGNMENT {
            self.alignment_entry = Some(start as u64);
        }
        store.insert(key, value)
    }

    fn read_descriptors(&mut self, count: u64, alignment: u32) -> Result<TensorTable> {
        self.check_count(count, MIN_DESCRIPTOR_LEN, "tensor descriptors")?;

        let mut table = TensorTable::new();
        for _ in 0..count {
            let start = self.pos;
            let descriptor = self.read_descriptor().map_err(|e| e.at(start as u64))?;
            trace!(name = %descriptor.name, shape = ?descriptor.shape, offset = descriptor.offset, "tensor descriptor");
            table
                .push_recorded(descriptor, alignment)
                .map_err(|e| e.at(start as u64))?;
        }
        Ok(table)
    }

    fn read_descriptor(&mut self) -> Result<TensorDescriptor> {
        let name = read_string(self.data, &mut self.pos)?;
        let n_dims = read_u32(self.data, &mut self.pos)?;
        if n_dims == 0 || n_dims as usize > MAX_DIMS {
            return Err(GGUFError::CorruptLayout(format!(
                "tensor '{name}' has {n_dims} dimensions (expected 1..={MAX_DIMS})"
            )));
        }
        let shape = (0..n_dims)
            .map(|_| read_u64(self.data, &mut self.pos))
            .collect::<Result<Vec<u64>>>()?;
        let tensor_type = TensorType::try_from(read_u32(self.data, &mut self.pos)?)?;
        let offset = read_u64(self.data, &mut self.pos)?;

        let mut descriptor = TensorDescriptor::new(name, shape, tensor_type)
            .map_err(|e| GGUFError::CorruptLayout(e.to_string()))?;
        descriptor.offset = offset;
        Ok(descriptor)
    }

    /// Check the zero padding between the index and the data region and
    /// return the data region's absolute offset. Padding cut off by the end
    /// of the source is tolerated; payload access reports the truncation.
    fn skip_padding(&mut self, alignment: u32) -> Result<u64> {
        let data_offset = align_up(self.pos as u64, u64::from(alignment));
        let pad_end = (data_offset as usize).min(self.data.len());
        if self.data[self.pos..pad_end].iter().any(|&b| b != 0) {
            return Err(GGUFError::CorruptLayout("non-zero alignment padding".into())
                .at(self.pos as u64));
        }
        self.pos = pad_end;
        Ok(data_offset)
    }

    fn check_count(&self, count: u64, min_len: u64, what: &str) -> Result<()> {
        let remaining = self.remaining();
        if count.checked_mul(min_len).is_none_or(|n| n > remaining) {
            return Err(GGUFError::MalformedValue(format!(
                "{count} {what} cannot fit in the remaining {remaining} bytes"
            ))
            .at(self.pos as u64));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn header(version: u32, tensor_count: u64, metadata_count: u64) -> Vec<u8> {
        let mut d = Vec::new();
        d.extend_from_slice(b"GGUF");
        d.extend_from_slice(&version.to_le_bytes());
        d.extend_from_slice(&tensor_count.to_le_bytes());
        d.extend_from_slice(&metadata_count.to_le_bytes());
        d
    }

    fn push_string(d: &mut Vec<u8>, s: &str) {
        d.extend_from_slice(&(s.len() as u64).to_le_bytes());
        d.extend_from_slice(s.as_bytes());
    }

    #[test]
    fn empty_file_parses() {
        let reader = GGUFReader::new(header(3, 0, 0)).unwrap();
        assert_eq!(reader.version(), 3);
        assert_eq!(reader.state(), ReaderState::Ready);
        assert!(reader.list_metadata().is_empty());
        assert!(reader.list_tensors().is_empty());
        assert_eq!(reader.data_offset(), 32);
    }

    #[test]
    fn accepts_version_2() {
        assert_eq!(GGUFReader::new(header(2, 0, 0)).unwrap().version(), 2);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut d = header(3, 0, 0);
        d[..4].copy_from_slice(b"GGML");
        let err = GGUFReader::new(d).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::BadMagic);
        assert_eq!(err.offset(), Some(0));
        assert_eq!(err.reached_state(), Some(ReaderState::Unopened));
    }

    #[test]
    fn rejects_unsupported_versions() {
        for version in [0, 1, 4, 99] {
            let err = GGUFReader::new(header(version, 0, 0)).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::UnsupportedVersion, "version {version}");
            assert_eq!(err.offset(), Some(4));
        }
    }

    #[test]
    fn short_header_is_truncated() {
        let err = GGUFReader::new(b"GG".to_vec()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::TruncatedFile);
        let err = GGUFReader::new(header(3, 0, 0)[..20].to_vec()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::TruncatedFile);
    }

    #[test]
    fn duplicate_key_reports_offset() {
        let mut d = header(3, 0, 2);
        for _ in 0..2 {
            push_string(&mut d, "k");
            d.extend_from_slice(&(GGUFValueType::Uint8 as u32).to_le_bytes());
            d.push(1);
        }
        let err = GGUFReader::new(d).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);
        assert_eq!(err.reached_state(), Some(ReaderState::HeaderValidated));
        // second entry starts after the header (24) and first entry (8+1+4+1)
        assert_eq!(err.offset(), Some(38));
    }

    #[test]
    fn impossible_metadata_count_is_malformed() {
        let err = GGUFReader::new(header(3, 0, u64::MAX)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::MalformedValue);
    }

    #[test]
    fn unknown_tensor_type_is_corrupt_layout() {
        let mut d = header(3, 1, 0);
        push_string(&mut d, "t");
        d.extend_from_slice(&1u32.to_le_bytes());
        d.extend_from_slice(&4u64.to_le_bytes());
        d.extend_from_slice(&4u32.to_le_bytes()); // removed Q4_2
        d.extend_from_slice(&0u64.to_le_bytes());
        let err = GGUFReader::new(d).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::CorruptLayout);
        assert_eq!(err.offset(), Some(24));
        assert_eq!(err.reached_state(), Some(ReaderState::MetadataLoaded));
    }

    #[test]
    fn invalid_alignment_points_at_its_entry() {
        let mut d = header(3, 0, 2);
        push_string(&mut d, "general.name");
        d.extend_from_slice(&(GGUFValueType::String as u32).to_le_bytes());
        push_string(&mut d, "m");
        let entry = d.len() as u64;
        push_string(&mut d, KEY_ALIGNMENT);
        d.extend_from_slice(&(GGUFValueType::Uint32 as u32).to_le_bytes());
        d.extend_from_slice(&48u32.to_le_bytes());
        let err = GGUFReader::new(d).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::CorruptLayout);
        assert_eq!(err.offset(), Some(entry));
        assert_eq!(err.reached_state(), Some(ReaderState::MetadataLoaded));
    }

    #[test]
    fn zero_dimensions_are_corrupt_layout() {
        let mut d = header(3, 1, 0);
        push_string(&mut d, "t");
        d.extend_from_slice(&0u32.to_le_bytes());
        d.extend_from_slice(&0u32.to_le_bytes());
        d.extend_from_slice(&0u64.to_le_bytes());
        d.extend_from_slice(&[0u8; 8]);
        let err = GGUFReader::new(d).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::CorruptLayout);
    }

    #[test]
    fn non_zero_padding_is_corrupt_layout() {
        let mut d = header(3, 0, 0);
        d.extend_from_slice(&[0, 0, 7]);
        let err = GGUFReader::new(d).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::CorruptLayout);
    }

    #[test]
    fn unknown_tensor_lookup() {
        let reader = GGUFReader::new(header(3, 0, 0)).unwrap();
        let err = reader.tensor_bytes("missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownTensor);
    }
}
