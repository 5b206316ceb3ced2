//! Flat inner-product similarity index persisted as a single file.
//!
//! Layout (little endian): magic `MVIX`, `u32` format version, `u32`
//! dimension, `u64` entry count, then per entry an `i64` movie id followed by
//! `dimension` `f32` values. The header alone is enough to learn the entry
//! count, which the stage controller uses to detect a stale index.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::semantic::dot_product;
use crate::util::ensure_parent_directory;

const INDEX_MAGIC: &[u8; 4] = b"MVIX";
const INDEX_FORMAT_VERSION: u32 = 1;

const HEADER_LEN: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub dimensions: usize,
    pub count: usize,
}

impl IndexHeader {
    /// Total `f32` values in the body; `None` on overflow.
    fn value_count(&self) -> Option<usize> {
        self.count.checked_mul(self.dimensions)
    }

    /// Exact size of a well-formed file with this header; `None` on overflow.
    fn file_len(&self) -> Option<u64> {
        let entry_len = (self.dimensions as u64).checked_mul(4)?.checked_add(8)?;
        (self.count as u64).checked_mul(entry_len)?.checked_add(HEADER_LEN)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: i64,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dimensions: usize,
    ids: Vec<i64>,
    vectors: Vec<f32>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[cfg(test)]
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Appends one entry. The first vector fixes the dimensionality.
    pub fn add(&mut self, id: i64, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            bail!("refusing to index empty vector for id {id}");
        }
        if self.ids.is_empty() {
            self.dimensions = vector.len();
        } else if vector.len() != self.dimensions {
            bail!(
                "vector for id {} has dimension {}, index expects {}",
                id,
                vector.len(),
                self.dimensions
            );
        }

        self.ids.push(id);
        self.vectors.extend_from_slice(vector);
        Ok(())
    }

    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        if k == 0 || self.is_empty() || query.len() != self.dimensions {
            return Vec::new();
        }

        let mut hits = self
            .ids
            .iter()
            .zip(self.vectors.chunks_exact(self.dimensions))
            .map(|(id, vector)| SearchHit {
                id: *id,
                score: dot_product(query, vector),
            })
            .collect::<Vec<SearchHit>>();

        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then(left.id.cmp(&right.id))
        });
        hits.truncate(k);
        hits
    }

    /// Writes to a sibling temp file and renames it into place, so a crash
    /// never leaves a truncated index at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if self.is_empty() {
            bail!("refusing to persist an empty index to {}", path.display());
        }
        ensure_parent_directory(path)?;

        let tmp_path = temp_path_for(path);
        {
            let file = File::create(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            let mut writer = BufWriter::new(file);

            writer.write_all(INDEX_MAGIC)?;
            writer.write_all(&INDEX_FORMAT_VERSION.to_le_bytes())?;
            writer.write_all(&(self.dimensions as u32).to_le_bytes())?;
            writer.write_all(&(self.ids.len() as u64).to_le_bytes())?;

            for (id, vector) in self
                .ids
                .iter()
                .zip(self.vectors.chunks_exact(self.dimensions))
            {
                writer.write_all(&id.to_le_bytes())?;
                for value in vector {
                    writer.write_all(&value.to_le_bytes())?;
                }
            }

            let file = writer
                .into_inner()
                .map_err(|err| err.into_error())
                .with_context(|| format!("failed to flush {}", tmp_path.display()))?;
            file.sync_all()
                .with_context(|| format!("failed to sync {}", tmp_path.display()))?;
        }

        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open index {}", path.display()))?;
        let file_len = file
            .metadata()
            .with_context(|| format!("failed to stat index {}", path.display()))?
            .len();
        let mut reader = BufReader::new(file);
        let header = read_header_from(&mut reader)
            .with_context(|| format!("invalid index header in {}", path.display()))?;

        let value_count = header.value_count().with_context(|| {
            format!("index header in {} overflows: {:?}", path.display(), header)
        })?;
        let expected_len = header.file_len().with_context(|| {
            format!("index header in {} overflows: {:?}", path.display(), header)
        })?;
        if expected_len != file_len {
            bail!(
                "index file {} is {} bytes, header describes {}",
                path.display(),
                file_len,
                expected_len
            );
        }
        if header.count > 0 && header.dimensions == 0 {
            bail!("index file {} has entries of dimension 0", path.display());
        }

        let mut ids = Vec::with_capacity(header.count);
        let mut vectors = Vec::with_capacity(value_count);
        let mut id_buf = [0_u8; 8];
        let mut value_buf = [0_u8; 4];

        for _ in 0..header.count {
            reader
                .read_exact(&mut id_buf)
                .with_context(|| format!("truncated index file {}", path.display()))?;
            ids.push(i64::from_le_bytes(id_buf));

            for _ in 0..header.dimensions {
                reader
                    .read_exact(&mut value_buf)
                    .with_context(|| format!("truncated index file {}", path.display()))?;
                vectors.push(f32::from_le_bytes(value_buf));
            }
        }

        Ok(Self {
            dimensions: header.dimensions,
            ids,
            vectors,
        })
    }
}

/// Reads only the header. Returns `Ok(None)` when the file does not exist.
pub fn read_index_header(path: &Path) -> Result<Option<IndexHeader>> {
    if !path.exists() {
        return Ok(None);
    }

    let file =
        File::open(path).with_context(|| format!("failed to open index {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let header = read_header_from(&mut reader)
        .with_context(|| format!("invalid index header in {}", path.display()))?;
    Ok(Some(header))
}

fn read_header_from<R: Read>(reader: &mut R) -> Result<IndexHeader> {
    let mut magic = [0_u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != INDEX_MAGIC {
        bail!("bad magic {:?}", magic);
    }

    let mut u32_buf = [0_u8; 4];
    reader.read_exact(&mut u32_buf)?;
    let version = u32::from_le_bytes(u32_buf);
    if version != INDEX_FORMAT_VERSION {
        bail!("unsupported index format version {version}");
    }

    reader.read_exact(&mut u32_buf)?;
    let dimensions = u32::from_le_bytes(u32_buf) as usize;

    let mut u64_buf = [0_u8; 8];
    reader.read_exact(&mut u64_buf)?;
    let count = u64::from_le_bytes(u64_buf) as usize;

    Ok(IndexHeader { dimensions, count })
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|value| value.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
