//! Saving and loading whole parameter sets.
//!
//! # Named `.bpat` Format
//!
//! Snapshots must be self-describing: every entry carries its name, category
//! and shape next to the data, so a loaded bundle can be matched back onto a
//! model by name, statistics included.
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┬────────────────────┐
//! │ Header       │ Entry N .. N+1 .. N+2 ..     │ Checksum           │
//! ├──────────────┼──────────────────────────────┼────────────────────┤
//! │ `BPATn1\0\0` │ u64: name length             │ u32: file checksum │
//! │ u64: count   │ [u8] utf-8 name              │                    │
//! │              │ u8: category (0 = trainable) │                    │
//! │              │ u64: ndim                    │                    │
//! │              │ [u64; ndim] shape            │                    │
//! │              │ [f64; prod(shape)] data      │                    │
//! │              │ u32: entry checksum          │                    │
//! └──────────────┴──────────────────────────────┴────────────────────┘
//! ```
//!
//! All integers and floats are little-endian. Checksums are CRC-32. Gradient
//! buffers are not stored.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use briny::prelude::*;
use crc32fast::Hasher as Crc32;
use tracing::debug;

use crate::catalog::{Category, Parameter};
use crate::error::{ContinualError, Result};
use crate::tensors::{Ten64, Tensor};

/// Magic bytes opening every named bundle.
pub const BPAT_MAGIC_NAMED: [u8; 8] = *b"BPATn1\0\0";

/// One decoded entry before it is trusted.
struct PackedEntry {
    name: Vec<u8>,
    category: u8,
    shape: Vec<u64>,
    data: Vec<f64>,
}

impl Validate for PackedEntry {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        if self.name.is_empty() || std::str::from_utf8(&self.name).is_err() {
            return Err(ValidationError);
        }
        if Category::from_tag(self.category).is_none() {
            return Err(ValidationError);
        }
        let expected = self
            .shape
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d))
            .ok_or(ValidationError)?;
        if self.data.len() as u64 != expected {
            return Err(ValidationError);
        }
        Ok(())
    }
}

fn corrupt(msg: &'static str) -> ContinualError {
    ContinualError::Corrupt { msg }
}

fn encode_entry(param: &Parameter) -> Vec<u8> {
    let name = param.name.as_bytes();
    let mut buf = Vec::with_capacity(8 + name.len() + 1 + 8 * (1 + param.value.shape.len() + param.numel()));
    buf.extend_from_slice(&(name.len() as u64).to_le_bytes());
    buf.extend_from_slice(name);
    buf.push(param.category.tag());
    buf.extend_from_slice(&(param.value.shape.len() as u64).to_le_bytes());
    for &dim in &param.value.shape {
        buf.extend_from_slice(&(dim as u64).to_le_bytes());
    }
    for &x in &param.value.data {
        buf.extend_from_slice(&x.to_le_bytes());
    }
    buf
}

/// Writes `params` (values only) to `path`, creating parent directories.
///
/// # Errors
/// - [`ContinualError::ShapeMismatch`] if a value's shape and data disagree.
/// - [`ContinualError::Io`] if the file cannot be written.
pub fn save_bundle(path: &Path, params: &[Parameter]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut file = BufWriter::new(File::create(path)?);
    let mut hasher = Crc32::new();

    let count = (params.len() as u64).to_le_bytes();
    file.write_all(&BPAT_MAGIC_NAMED)?;
    file.write_all(&count)?;
    hasher.update(&BPAT_MAGIC_NAMED);
    hasher.update(&count);

    for param in params {
        if param.value.shape.iter().product::<usize>() != param.value.data.len() {
            return Err(ContinualError::shape(format!(
                "'{}' has shape {:?} but {} elements",
                param.name,
                param.value.shape,
                param.value.data.len()
            )));
        }
        let buf = encode_entry(param);
        let mut crc = Crc32::new();
        crc.update(&buf);
        let entry_crc = crc.finalize().to_le_bytes();

        file.write_all(&buf)?;
        file.write_all(&entry_crc)?;
        hasher.update(&buf);
        hasher.update(&entry_crc);
    }

    file.write_all(&hasher.finalize().to_le_bytes())?;
    file.flush()?;
    debug!(path = %path.display(), entries = params.len(), "wrote parameter bundle");
    Ok(())
}

/// Reads little-endian fields off the front of a byte slice.
struct Cursor<'a> {
    bytes: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(corrupt("truncated entry"));
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }

    fn len(&mut self) -> Result<usize> {
        usize::try_from(self.u64()?).map_err(|_| corrupt("length exceeds address space"))
    }
}

fn decode_entry(cursor: &mut Cursor<'_>) -> Result<Parameter> {
    let start = cursor.bytes;

    let name_len = cursor.len()?;
    let name = cursor.take(name_len)?.to_vec();
    let category = cursor.u8()?;
    let ndim = cursor.len()?;
    if ndim > cursor.bytes.len() / 8 {
        return Err(corrupt("truncated shape"));
    }
    let mut shape = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        shape.push(cursor.u64()?);
    }
    let numel = shape
        .iter()
        .try_fold(1usize, |acc, &d| usize::try_from(d).ok().and_then(|d| acc.checked_mul(d)))
        .ok_or_else(|| corrupt("shape overflows"))?;
    let raw = cursor.take(numel.checked_mul(8).ok_or_else(|| corrupt("shape overflows"))?)?;
    let data = raw
        .chunks_exact(8)
        .map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            f64::from_le_bytes(b)
        })
        .collect();

    let consumed = start.len() - cursor.bytes.len();
    let mut crc = Crc32::new();
    crc.update(&start[..consumed]);
    if crc.finalize() != cursor.u32()? {
        return Err(corrupt("entry checksum mismatch"));
    }

    let packed = PackedEntry {
        name,
        category,
        shape,
        data,
    };
    let trusted = TrustedData::new(packed).map_err(|_| corrupt("entry failed validation"))?;
    let inner = trusted.into_inner();

    let name = String::from_utf8(inner.name).map_err(|_| corrupt("entry name is not utf-8"))?;
    let category = Category::from_tag(inner.category).ok_or_else(|| corrupt("unknown category"))?;
    let shape: Vec<usize> = inner.shape.iter().map(|&d| d as usize).collect();
    Ok(Parameter::with_category(name, category, Tensor::try_new(shape, inner.data)?))
}

/// Loads every entry written by [`save_bundle`], in file order.
///
/// # Errors
/// - [`ContinualError::Io`] if the file cannot be read.
/// - [`ContinualError::Corrupt`] on a bad header, checksum or entry.
pub fn load_bundle(path: &Path) -> Result<Vec<Parameter>> {
    let mut file = BufReader::new(File::open(path)?);
    let mut full = Vec::new();
    file.read_to_end(&mut full)?;

    if full.len() < BPAT_MAGIC_NAMED.len() + 8 + 4 {
        return Err(corrupt("file too small"));
    }
    let (body, crc_bytes) = full.split_at(full.len() - 4);
    let mut expected = [0u8; 4];
    expected.copy_from_slice(crc_bytes);
    let mut hasher = Crc32::new();
    hasher.update(body);
    if hasher.finalize() != u32::from_le_bytes(expected) {
        return Err(corrupt("file checksum mismatch"));
    }

    let mut cursor = Cursor { bytes: body };
    if cursor.take(8)? != BPAT_MAGIC_NAMED {
        return Err(corrupt("invalid magic header"));
    }
    let count = cursor.len()?;
    let mut params = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        params.push(decode_entry(&mut cursor)?);
    }
    if !cursor.bytes.is_empty() {
        return Err(corrupt("trailing bytes after last entry"));
    }
    debug!(path = %path.display(), entries = params.len(), "read parameter bundle");
    Ok(params)
}

/// Dumps loose named arrays (e.g. memory buffers, per-task statistics).
///
/// # Errors
/// Same as [`save_bundle`].
pub fn save_arrays(path: &Path, arrays: &[(String, Ten64)]) -> Result<()> {
    let params: Vec<Parameter> = arrays
        .iter()
        .map(|(name, t)| Parameter::with_category(name.clone(), Category::Trainable, t.clone()))
        .collect();
    save_bundle(path, &params)
}

/// Reads arrays written by [`save_arrays`].
///
/// # Errors
/// Same as [`load_bundle`].
pub fn load_arrays(path: &Path) -> Result<Vec<(String, Ten64)>> {
    Ok(load_bundle(path)?.into_iter().map(|p| (p.name, p.value)).collect())
}
