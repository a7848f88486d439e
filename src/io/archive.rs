//! Safetensors archives of named tensors
//!
//! Tensors are written at their logical dtype (`F32`, `F16` or `BF16`,
//! little endian) and read back with that dtype restored.

use crate::error::{Error, Result};
use crate::tensor::{DType, Device};
use crate::Tensor;
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Free-form string metadata stored in the archive header.
pub type ArchiveMetadata = HashMap<String, String>;

fn to_bytes(tensor: &Tensor) -> (Dtype, Vec<u8>) {
    let values = tensor.to_vec();
    match tensor.dtype() {
        DType::F32 => (Dtype::F32, bytemuck::cast_slice(&values).to_vec()),
        DType::F16 => (
            Dtype::F16,
            values.iter().flat_map(|&v| half::f16::from_f32(v).to_le_bytes()).collect(),
        ),
        DType::BF16 => (
            Dtype::BF16,
            values.iter().flat_map(|&v| half::bf16::from_f32(v).to_le_bytes()).collect(),
        ),
    }
}

fn from_view(name: &str, view: &TensorView<'_>) -> Result<Tensor> {
    let data = view.data();
    let (values, dtype): (Vec<f32>, DType) = match view.dtype() {
        Dtype::F32 => (
            data.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect(),
            DType::F32,
        ),
        Dtype::F16 => (
            data.chunks_exact(2).map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32()).collect(),
            DType::F16,
        ),
        Dtype::BF16 => (
            data.chunks_exact(2).map(|c| half::bf16::from_le_bytes([c[0], c[1]]).to_f32()).collect(),
            DType::BF16,
        ),
        other => {
            return Err(Error::SafeTensors(format!("tensor '{name}' has unsupported dtype {other:?}")));
        }
    };
    Tensor::from_vec(values, view.shape())?.to(Device::Cpu, dtype)
}

/// Serialize `tensors` with optional header metadata.
pub fn encode(tensors: &BTreeMap<String, Tensor>, metadata: Option<ArchiveMetadata>) -> Result<Vec<u8>> {
    let buffers: Vec<(&str, Dtype, Vec<usize>, Vec<u8>)> = tensors
        .iter()
        .map(|(name, t)| {
            let (dtype, bytes) = to_bytes(t);
            (name.as_str(), dtype, t.shape().to_vec(), bytes)
        })
        .collect();

    let views = buffers
        .iter()
        .map(|(name, dtype, shape, bytes)| Ok((*name, TensorView::new(*dtype, shape.clone(), bytes)?)))
        .collect::<Result<Vec<_>>>()?;

    Ok(safetensors::serialize(views, metadata)?)
}

/// Parse an archive into tensors and its header metadata.
pub fn decode(bytes: &[u8]) -> Result<(BTreeMap<String, Tensor>, Option<ArchiveMetadata>)> {
    let (_, header) = SafeTensors::read_metadata(bytes)?;
    let metadata = header.metadata().clone();
    let archive = SafeTensors::deserialize(bytes)?;
    let tensors = archive
        .tensors()
        .into_iter()
        .map(|(name, view)| {
            let tensor = from_view(&name, &view)?;
            Ok((name, tensor))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;
    Ok((tensors, metadata))
}

pub fn write(path: impl AsRef<Path>, tensors: &BTreeMap<String, Tensor>, metadata: Option<ArchiveMetadata>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, encode(tensors, metadata)?)?;
    Ok(())
}

pub fn read(path: impl AsRef<Path>) -> Result<(BTreeMap<String, Tensor>, Option<ArchiveMetadata>)> {
    let bytes = std::fs::read(path.as_ref())?;
    decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_keeps_shapes_values_and_metadata() {
        let mut tensors = BTreeMap::new();
        tensors.insert("a.lora_down.weight".to_string(), Tensor::from_vec(vec![1.0, -2.5, 3.25, 0.0], &[2, 2]).unwrap());
        tensors.insert("a.alpha".to_string(), Tensor::scalar(8.0));
        let mut meta = ArchiveMetadata::new();
        meta.insert("rank".to_string(), "2".to_string());

        let (loaded, loaded_meta) = decode(&encode(&tensors, Some(meta)).unwrap()).unwrap();
        assert_eq!(loaded, tensors);
        assert_eq!(loaded_meta.unwrap()["rank"], "2");
    }

    #[test]
    fn test_half_precision_dtype_survives() {
        let t = Tensor::from_vec(vec![0.1, 1.5, -3.0], &[3]).unwrap().to(Device::Cpu, DType::BF16).unwrap();
        let mut tensors = BTreeMap::new();
        tensors.insert("x".to_string(), t.clone());

        let bytes = encode(&tensors, None).unwrap();
        let (loaded, meta) = decode(&bytes).unwrap();
        assert!(meta.is_none());
        assert_eq!(loaded["x"].dtype(), DType::BF16);
        assert_eq!(loaded["x"].to_vec(), t.to_vec());
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(matches!(decode(b"not an archive"), Err(Error::SafeTensors(_))));
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/out.safetensors");
        write(&path, &BTreeMap::new(), None).unwrap();
        assert!(read(&path).unwrap().0.is_empty());
    }
}
