//! Tensor descriptors and the ordered descriptor table.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{GGUFError, Result};
use crate::types::{MAX_DIMS, TensorType, align_up};

/// One entry of the tensor index.
///
/// `offset` is relative to the start of the tensor data region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TensorDescriptor {
    pub name: String,
    pub shape: Vec<u64>,
    pub tensor_type: TensorType,
    pub offset: u64,
    pub size: u64,
}

impl TensorDescriptor {
    /// Descriptor whose size is derived from `shape` and `tensor_type`.
    pub fn new(name: impl Into<String>, shape: Vec<u64>, tensor_type: TensorType) -> Result<Self> {
        let name = name.into();
        let size = expected_size(&name, &shape, tensor_type)?;
        Ok(Self {
            name,
            shape,
            tensor_type,
            offset: 0,
            size,
        })
    }

    pub fn n_elements(&self) -> u64 {
        self.shape.iter().fold(1u64, |acc, &d| acc.saturating_mul(d))
    }

    /// First byte past this tensor's payload, relative to the data region.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

fn expected_size(name: &str, shape: &[u64], tensor_type: TensorType) -> Result<u64> {
    let size = if shape.len() > MAX_DIMS {
        None
    } else {
        tensor_type.byte_size(shape)
    };
    size.ok_or_else(|| GGUFError::InvalidShape {
        name: name.to_owned(),
        shape: shape.to_vec(),
    })
}

/// Ordered descriptor table with unique names.
#[derive(Debug, Clone, Default)]
pub struct TensorTable {
    descriptors: Vec<TensorDescriptor>,
    index: HashMap<String, usize>,
}

impl TensorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor after checking its name, shape and size.
    /// On failure the table is unchanged.
    pub fn add(&mut self, descriptor: TensorDescriptor) -> Result<()> {
        self.validate(&descriptor)?;
        self.push(descriptor);
        Ok(())
    }

    /// Append a descriptor read from a file, trusting its recorded offset
    /// as long as it is aligned and starts after the previous payload.
    pub fn push_recorded(&mut self, descriptor: TensorDescriptor, alignment: u32) -> Result<()> {
        self.validate(&descriptor)
            .map_err(|e| GGUFError::CorruptLayout(e.to_string()))?;
        if descriptor.offset % u64::from(alignment) != 0 {
            return Err(GGUFError::CorruptLayout(format!(
                "tensor '{}' offset {} is not aligned to {alignment}",
                descriptor.name, descriptor.offset
            )));
        }
        let prev_end = self.data_size();
        if descriptor.offset < prev_end {
            return Err(GGUFError::CorruptLayout(format!(
                "tensor '{}' at offset {} overlaps the previous tensor ending at {prev_end}",
                descriptor.name, descriptor.offset
            )));
        }
        if descriptor.offset.checked_add(descriptor.size).is_none() {
            return Err(GGUFError::CorruptLayout(format!(
                "tensor '{}' extends past the addressable range",
                descriptor.name
            )));
        }
        self.push(descriptor);
        Ok(())
    }

    /// Lay the tensors out back to back in insertion order, each starting
    /// on an `alignment` boundary. Returns the padded data region length.
    pub fn assign_offsets(&mut self, alignment: u32) -> u64 {
        let alignment = u64::from(alignment);
        let mut offset = 0;
        for d in &mut self.descriptors {
            d.offset = offset;
            offset = align_up(offset + d.size, alignment);
        }
        offset
    }

    pub fn get(&self, name: &str) -> Option<&TensorDescriptor> {
        self.index.get(name).map(|&i| &self.descriptors[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TensorDescriptor> {
        self.descriptors.iter()
    }

    pub fn as_slice(&self) -> &[TensorDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// End of the last payload (unpadded), relative to the data region.
    pub fn data_size(&self) -> u64 {
        self.descriptors.last().map_or(0, TensorDescriptor::end)
    }

    fn validate(&self, d: &TensorDescriptor) -> Result<()> {
        if self.index.contains_key(&d.name) {
            return Err(GGUFError::DuplicateTensorName(d.name.clone()));
        }
        let expected = expected_size(&d.name, &d.shape, d.tensor_type)?;
        if expected != d.size {
            return Err(GGUFError::SizeMismatch {
                name: d.name.clone(),
                expected,
                actual: d.size,
            });
        }
        Ok(())
    }

    fn push(&mut self, d: TensorDescriptor) {
        self.index.insert(d.name.clone(), self.descriptors.len());
        self.descriptors.push(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn f32_tensor(name: &str, shape: &[u64]) -> TensorDescriptor {
        TensorDescriptor::new(name, shape.to_vec(), TensorType::F32).unwrap()
    }

    #[test]
    fn descriptor_size_follows_type() {
        let d = f32_tensor("fc1.weight", &[2, 2]);
        assert_eq!(d.size, 16);
        assert_eq!(d.n_elements(), 4);
    }

    #[test]
    fn rejects_bad_shapes() {
        for shape in [vec![], vec![2, 0], vec![1, 1, 1, 1, 1]] {
            let err = TensorDescriptor::new("t", shape, TensorType::F32).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidShape);
        }
    }

    #[test]
    fn duplicate_name_leaves_table_unchanged() {
        let mut table = TensorTable::new();
        table.add(f32_tensor("w", &[4])).unwrap();
        let err = table.add(f32_tensor("w", &[8])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateTensorName);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("w").unwrap().shape, [4]);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let mut table = TensorTable::new();
        let mut d = f32_tensor("w", &[2, 2]);
        d.size = 12;
        let err = table.add(d).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        assert!(table.is_empty());
    }

    #[test]
    fn offsets_are_aligned_in_insertion_order() {
        let mut table = TensorTable::new();
        table.add(f32_tensor("a", &[3])).unwrap(); // 12 bytes
        table.add(f32_tensor("b", &[10])).unwrap(); // 40 bytes
        table.add(f32_tensor("c", &[1])).unwrap(); // 4 bytes
        let total = table.assign_offsets(32);
        let offsets: Vec<u64> = table.iter().map(|d| d.offset).collect();
        assert_eq!(offsets, [0, 32, 96]);
        assert_eq!(total, 128);
    }

    #[test]
    fn recorded_offsets_must_be_aligned() {
        let mut table = TensorTable::new();
        let mut d = f32_tensor("a", &[4]);
        d.offset = 16;
        let err = table.push_recorded(d, 32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptLayout);
    }

    #[test]
    fn recorded_offsets_must_not_overlap() {
        let mut table = TensorTable::new();
        table.push_recorded(f32_tensor("a", &[16]), 32).unwrap(); // 64 bytes
        let mut b = f32_tensor("b", &[1]);
        b.offset = 32;
        let err = table.push_recorded(b, 32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptLayout);

        let mut c = f32_tensor("c", &[1]);
        c.offset = 64;
        table.push_recorded(c, 32).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn recorded_duplicates_are_layout_errors() {
        let mut table = TensorTable::new();
        table.push_recorded(f32_tensor("a", &[1]), 32).unwrap();
        let mut again = f32_tensor("a", &[1]);
        again.offset = 32;
        let err = table.push_recorded(again, 32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptLayout);
    }
}
