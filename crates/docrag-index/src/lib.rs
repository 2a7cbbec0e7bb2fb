//! # docrag-index
//!
//! Persistent, append-mostly flat vector index with exact L2 search.
//!
//! The index is a pair of files: `<scope>.vec` holds the raw vectors,
//! `<scope>.sid` (the sidecar) maps each internal sequence to its chunk id.
//! The on-disk pair is the single source of truth across processes: the
//! ingestion worker appends and saves; searchers stat the file before every
//! search and reload only when the modification time has moved (hot reload).
//! Reload cost is tens of milliseconds and amortizes across many queries;
//! the per-search stat is sub-millisecond.
//!
//! Deletion tombstones sidecar entries in place (`chunk_id = -1`); a
//! compaction pass rebuilds both files without them once the tombstone
//! ratio crosses a threshold. Sequences of surviving entries never change
//! between compactions.
//!
//! ## File formats
//!
//! ```text
//! <scope>.vec:  magic "DRVI" | version u32 | dim u32 | count u64 | count*dim f32 (LE)
//! <scope>.sid:  magic "DRSI" | version u32 | count u64 | count i64 chunk ids (LE)
//! ```
//!
//! Both are written atomically: to `*.tmp`, fsynced, then renamed.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use docrag_core::IndexError;
use tracing::{debug, info};

const VEC_MAGIC: &[u8; 4] = b"DRVI";
const SID_MAGIC: &[u8; 4] = b"DRSI";
const FORMAT_VERSION: u32 = 1;

/// Sidecar value marking a tombstoned sequence.
pub const TOMBSTONE: i64 = -1;

/// Index statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    /// Total sequences, tombstones included
    pub total: usize,
    /// Sequences with a live chunk id
    pub live: usize,
    /// Tombstoned sequences
    pub tombstones: usize,
    /// Vector dimension
    pub dimension: usize,
}

/// Flat L2 index over fixed-dimension vectors, with a sidecar mapping
/// internal sequence to chunk id.
pub struct FlatIndex {
    dimension: usize,
    /// Row-major vectors, `total() * dimension` values
    vectors: Vec<f32>,
    /// Sidecar: sequence -> chunk id, `TOMBSTONE` for removed entries
    chunk_ids: Vec<i64>,
    vec_path: PathBuf,
    sid_path: PathBuf,
    /// Modification time of `vec_path` as of the last load/save
    disk_mtime: Option<SystemTime>,
    /// Hot reloads performed, for instrumentation
    reload_count: AtomicU64,
    /// Tombstone ratio above which `maybe_compact` rebuilds
    compaction_threshold: f64,
}

impl FlatIndex {
    /// Open an index scope under `dir`, loading the on-disk pair when it
    /// exists and starting empty otherwise.
    pub fn open(
        dir: &Path,
        scope: &str,
        dimension: usize,
        compaction_threshold: f64,
    ) -> Result<Self, IndexError> {
        let vec_path = dir.join(format!("{scope}.vec"));
        let sid_path = dir.join(format!("{scope}.sid"));

        let mut index = Self {
            dimension,
            vectors: Vec::new(),
            chunk_ids: Vec::new(),
            vec_path,
            sid_path,
            disk_mtime: None,
            reload_count: AtomicU64::new(0),
            compaction_threshold,
        };

        if index.vec_path.exists() && index.sid_path.exists() {
            index.load()?;
        } else {
            info!(
                "starting empty vector index (dimension {}) at {:?}",
                dimension, index.vec_path
            );
        }

        Ok(index)
    }

    /// Vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Total sequences including tombstones.
    #[must_use]
    pub fn total(&self) -> usize {
        self.chunk_ids.len()
    }

    /// Live (non-tombstoned) sequences.
    #[must_use]
    pub fn live(&self) -> usize {
        self.chunk_ids.iter().filter(|id| **id != TOMBSTONE).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    /// Hot reloads performed so far.
    #[must_use]
    pub fn reload_count(&self) -> u64 {
        self.reload_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let total = self.total();
        let live = self.live();
        IndexStats {
            total,
            live,
            tombstones: total - live,
            dimension: self.dimension,
        }
    }

    /// Append vectors in order, returning the assigned sequences.
    ///
    /// The sequence -> chunk-id binding is immutable for the life of the
    /// index file; nothing is persisted until [`save`](Self::save).
    pub fn append(
        &mut self,
        vectors: &[Vec<f32>],
        chunk_ids: &[i64],
    ) -> Result<Vec<u64>, IndexError> {
        if vectors.len() != chunk_ids.len() {
            return Err(IndexError::Corrupt(format!(
                "{} vectors for {} chunk ids",
                vectors.len(),
                chunk_ids.len()
            )));
        }

        for vector in vectors {
            if vector.len() != self.dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
        }

        let start = self.chunk_ids.len() as u64;
        for (vector, chunk_id) in vectors.iter().zip(chunk_ids) {
            self.vectors.extend_from_slice(vector);
            self.chunk_ids.push(*chunk_id);
        }

        Ok((start..start + vectors.len() as u64).collect())
    }

    /// Tombstone the sequences mapped to the given chunk ids, returning how
    /// many entries were marked. Survivor sequences are unchanged.
    pub fn remove(&mut self, chunk_ids: &[i64]) -> usize {
        let mut marked = 0;
        for id in self.chunk_ids.iter_mut() {
            if *id != TOMBSTONE && chunk_ids.contains(id) {
                *id = TOMBSTONE;
                marked += 1;
            }
        }
        marked
    }

    /// Fraction of sequences that are tombstoned.
    #[must_use]
    pub fn tombstone_ratio(&self) -> f64 {
        if self.chunk_ids.is_empty() {
            return 0.0;
        }
        let dead = self.chunk_ids.iter().filter(|id| **id == TOMBSTONE).count();
        dead as f64 / self.chunk_ids.len() as f64
    }

    /// Exact k-nearest-neighbor search by L2 distance over the in-memory
    /// copy, skipping tombstones. Distances follow the flat-L2 convention
    /// (squared L2). An empty index returns an empty result; `k` beyond the
    /// live size returns as many as exist.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f32)>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if self.chunk_ids.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let mut scored: Vec<(i64, f32)> = self
            .chunk_ids
            .iter()
            .enumerate()
            .filter(|(_, id)| **id != TOMBSTONE)
            .map(|(seq, id)| {
                let offset = seq * self.dimension;
                let row = &self.vectors[offset..offset + self.dimension];
                let dist: f32 = row
                    .iter()
                    .zip(query)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                (*id, dist)
            })
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Whether the on-disk pair has changed since the last load/save.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        match fs::metadata(&self.vec_path).and_then(|m| m.modified()) {
            Ok(mtime) => self.disk_mtime != Some(mtime),
            Err(_) => false,
        }
    }

    /// Reload from disk when the file has changed. Returns whether a reload
    /// happened; bumps the instrumentation counter when it did.
    pub fn reload_if_stale(&mut self) -> Result<bool, IndexError> {
        if !self.is_stale() {
            return Ok(false);
        }
        self.load()?;
        self.reload_count.fetch_add(1, Ordering::Relaxed);
        debug!("hot-reloaded vector index ({} sequences)", self.total());
        Ok(true)
    }

    /// Write index and sidecar atomically (tmp file, fsync, rename) and
    /// record the resulting modification time.
    pub fn save(&mut self) -> Result<(), IndexError> {
        if let Some(parent) = self.vec_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let count = self.chunk_ids.len() as u64;
        debug_assert_eq!(self.vectors.len(), self.chunk_ids.len() * self.dimension);

        let vec_tmp = self.vec_path.with_extension("vec.tmp");
        {
            let mut writer = BufWriter::new(File::create(&vec_tmp)?);
            writer.write_all(VEC_MAGIC)?;
            writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
            writer.write_all(&(self.dimension as u32).to_le_bytes())?;
            writer.write_all(&count.to_le_bytes())?;
            for value in &self.vectors {
                writer.write_all(&value.to_le_bytes())?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        let sid_tmp = self.sid_path.with_extension("sid.tmp");
        {
            let mut writer = BufWriter::new(File::create(&sid_tmp)?);
            writer.write_all(SID_MAGIC)?;
            writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
            writer.write_all(&count.to_le_bytes())?;
            for id in &self.chunk_ids {
                writer.write_all(&id.to_le_bytes())?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        // Sidecar first: a reader pairing a new sidecar with an old index
        // fails the length check, while the reverse could silently misbind.
        fs::rename(&sid_tmp, &self.sid_path)?;
        fs::rename(&vec_tmp, &self.vec_path)?;

        self.disk_mtime = Some(fs::metadata(&self.vec_path)?.modified()?);
        info!(
            "saved vector index: {} sequences ({} live) at {:?}",
            count,
            self.live(),
            self.vec_path
        );
        Ok(())
    }

    /// Read index and sidecar from disk, replacing the in-memory copy.
    pub fn load(&mut self) -> Result<(), IndexError> {
        if !self.vec_path.exists() {
            return Err(IndexError::Missing(self.vec_path.clone()));
        }
        if !self.sid_path.exists() {
            return Err(IndexError::Missing(self.sid_path.clone()));
        }

        let (dimension, vectors) = read_vec_file(&self.vec_path)?;
        if dimension != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: dimension,
            });
        }

        let chunk_ids = read_sid_file(&self.sid_path)?;
        if vectors.len() != chunk_ids.len() * self.dimension {
            return Err(IndexError::Corrupt(format!(
                "index holds {} vectors but sidecar maps {} sequences",
                vectors.len() / self.dimension.max(1),
                chunk_ids.len()
            )));
        }

        self.vectors = vectors;
        self.chunk_ids = chunk_ids;
        self.disk_mtime = Some(fs::metadata(&self.vec_path)?.modified()?);
        Ok(())
    }

    /// Whether the tombstone ratio has crossed the compaction threshold.
    #[must_use]
    pub fn needs_compaction(&self) -> bool {
        self.tombstone_ratio() > self.compaction_threshold
    }

    /// Rebuild both files without tombstones and save atomically. Survivor
    /// order (and therefore relative sequence order) is preserved; absolute
    /// sequences change, which is why callers quiesce searches around this.
    pub fn compact(&mut self) -> Result<usize, IndexError> {
        let before = self.total();
        let mut vectors = Vec::with_capacity(self.live() * self.dimension);
        let mut chunk_ids = Vec::with_capacity(self.live());

        for (seq, id) in self.chunk_ids.iter().enumerate() {
            if *id != TOMBSTONE {
                let offset = seq * self.dimension;
                vectors.extend_from_slice(&self.vectors[offset..offset + self.dimension]);
                chunk_ids.push(*id);
            }
        }

        self.vectors = vectors;
        self.chunk_ids = chunk_ids;
        self.save()?;

        let removed = before - self.total();
        info!("compacted vector index: removed {} tombstones", removed);
        Ok(removed)
    }

    /// Compact when past the threshold; returns tombstones removed, if any.
    pub fn maybe_compact(&mut self) -> Result<Option<usize>, IndexError> {
        if self.needs_compaction() {
            Ok(Some(self.compact()?))
        } else {
            Ok(None)
        }
    }
}

fn read_vec_file(path: &Path) -> Result<(usize, Vec<f32>), IndexError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != VEC_MAGIC {
        return Err(IndexError::Corrupt("bad index magic".to_string()));
    }

    let version = read_u32(&mut reader)?;
    if version != FORMAT_VERSION {
        return Err(IndexError::Corrupt(format!(
            "unsupported index version {version}"
        )));
    }

    let dimension = read_u32(&mut reader)? as usize;
    let count = read_u64(&mut reader)? as usize;

    let mut vectors = vec![0f32; count * dimension];
    let mut buf = [0u8; 4];
    for value in vectors.iter_mut() {
        reader.read_exact(&mut buf)?;
        *value = f32::from_le_bytes(buf);
    }

    Ok((dimension, vectors))
}

fn read_sid_file(path: &Path) -> Result<Vec<i64>, IndexError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != SID_MAGIC {
        return Err(IndexError::Corrupt("bad sidecar magic".to_string()));
    }

    let version = read_u32(&mut reader)?;
    if version != FORMAT_VERSION {
        return Err(IndexError::Corrupt(format!(
            "unsupported sidecar version {version}"
        )));
    }

    let count = read_u64(&mut reader)? as usize;
    let mut ids = vec![0i64; count];
    let mut buf = [0u8; 8];
    for id in ids.iter_mut() {
        reader.read_exact(&mut buf)?;
        *id = i64::from_le_bytes(buf);
    }

    Ok(ids)
}

fn read_u32(reader: &mut impl Read) -> Result<u32, IndexError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut impl Read) -> Result<u64, IndexError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
