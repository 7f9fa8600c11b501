//! Nearest-neighbour vector index with size-driven topology.
//!
//! Topology is chosen once by [`choose_topology`] at build time and stored in
//! the persisted config, so a reload never re-derives it:
//!
//! | Vectors `n` | Topology | `nlist` | `nprobe` |
//! |-------------|----------|---------|----------|
//! | `< 1000` | flat (exact L2) | – | – |
//! | `1000..10000` | inverted file | `min(100, n/10)` | `min(10, nlist)` |
//! | `≥ 10000` | inverted file | `min(1000, n/50)` | `min(20, nlist)` |
//!
//! Distances are squared L2; search reports `similarity = exp(-distance)`,
//! a monotonic proxy in `(0, 1]`, not cosine similarity.
//!
//! # Persistence
//!
//! [`VectorIndex::save`] writes two companions next to a base path:
//!
//! - `<base>.index`: binary. Magic `LSIX`, a little-endian `u64` header
//!   length, the bincode header (format version, topology, dimension,
//!   counts), then centroids, per-row list assignment and the vectors as
//!   little-endian `f32`. Section sizes from the header are checked against
//!   the file length before anything is allocated.
//! - `<base>.meta.json`: format version, topology config, dimension,
//!   training state, vector count and the per-row [`ChunkMetadata`].
//!
//! Both must exist and agree on load. Each is written to a temp file and
//! renamed into place.

mod ivf;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::embedding::{blob_to_vec, squared_l2, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::ChunkMetadata;

const MAGIC: &[u8; 4] = b"LSIX";
/// Bumped whenever either artifact's layout changes.
pub const FORMAT_VERSION: u32 = 1;
/// Default Lloyd rounds when training an inverted-file index.
pub const DEFAULT_KMEANS_ITERATIONS: usize = 20;

/// Index structure, fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TopologyConfig {
    Flat,
    Ivf { nlist: usize, nprobe: usize },
}

impl TopologyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            TopologyConfig::Flat => "flat",
            TopologyConfig::Ivf { .. } => "ivf",
        }
    }
}

/// Pick the topology for a corpus of `n` vectors.
pub fn choose_topology(n: usize) -> TopologyConfig {
    if n < 1000 {
        TopologyConfig::Flat
    } else if n < 10_000 {
        let nlist = (n / 10).min(100);
        TopologyConfig::Ivf {
            nlist,
            nprobe: nlist.min(10),
        }
    } else {
        let nlist = (n / 50).min(1000);
        TopologyConfig::Ivf {
            nlist,
            nprobe: nlist.min(20),
        }
    }
}

/// Point-in-time description of an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub status: String,
    pub total_vectors: usize,
    pub dimension: usize,
    pub topology: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nlist: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nprobe: Option<usize>,
    pub is_trained: bool,
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor<'a> {
    pub metadata: &'a ChunkMetadata,
    /// Squared L2 distance to the query.
    pub distance: f32,
    /// `exp(-distance)`.
    pub similarity: f64,
}

#[derive(Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    topology: TopologyConfig,
    dimension: usize,
    is_trained: bool,
    count: usize,
    kmeans_iterations: usize,
    metadata: Vec<ChunkMetadata>,
}

/// Owns vectors (row-major), their metadata, and for the inverted-file
/// topology the trained centroids and per-centroid row lists.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    topology: TopologyConfig,
    dim: usize,
    kmeans_iterations: usize,
    trained: bool,
    vectors: Vec<f32>,
    metadata: Vec<ChunkMetadata>,
    centroids: Vec<f32>,
    /// Centroid of each row (inverted-file only).
    assignments: Vec<u32>,
    lists: Vec<Vec<usize>>,
}

impl VectorIndex {
    /// Empty index. Flat indexes are usable at once; inverted-file indexes
    /// need [`VectorIndex::train`] first.
    pub fn new(dim: usize, topology: TopologyConfig) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidParameters("index dimension must be > 0".into()));
        }
        if let TopologyConfig::Ivf { nlist, nprobe } = topology {
            if nlist == 0 || nprobe == 0 || nprobe > nlist {
                return Err(Error::InvalidParameters(format!(
                    "invalid inverted-file config: nlist={} nprobe={}",
                    nlist, nprobe
                )));
            }
        }
        Ok(Self {
            topology,
            dim,
            kmeans_iterations: DEFAULT_KMEANS_ITERATIONS,
            trained: topology == TopologyConfig::Flat,
            vectors: Vec::new(),
            metadata: Vec::new(),
            centroids: Vec::new(),
            assignments: Vec::new(),
            lists: Vec::new(),
        })
    }

    pub fn with_kmeans_iterations(mut self, iterations: usize) -> Self {
        self.kmeans_iterations = iterations.max(1);
        self
    }

    /// Choose a topology for `vectors.len()`, train if needed, and add everything.
    pub fn build(
        vectors: &[Vec<f32>],
        metadata: Vec<ChunkMetadata>,
        kmeans_iterations: usize,
    ) -> Result<Self> {
        let first = vectors.first().ok_or_else(|| {
            Error::InvalidParameters("cannot build an index from zero vectors".into())
        })?;
        let topology = choose_topology(vectors.len());
        let mut index = Self::new(first.len(), topology)?.with_kmeans_iterations(kmeans_iterations);
        index.train(vectors)?;
        index.add(vectors, metadata)?;
        tracing::info!(
            vectors = index.len(),
            dimension = index.dim,
            topology = topology.name(),
            "built vector index"
        );
        Ok(index)
    }

    /// Train the coarse quantizer over the full vector set. No-op for flat.
    pub fn train(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        let TopologyConfig::Ivf { nlist, .. } = self.topology else {
            return Ok(());
        };
        if vectors.len() < nlist {
            return Err(Error::InvalidParameters(format!(
                "training needs at least {} vectors, got {}",
                nlist,
                vectors.len()
            )));
        }
        let flat = self.flatten(vectors)?;
        self.centroids = ivf::train_centroids(&flat, self.dim, nlist, self.kmeans_iterations);
        self.lists = vec![Vec::new(); nlist];
        self.assignments.clear();
        // Rows added before a retrain are re-assigned.
        let existing = self.vectors.len() / self.dim;
        for row in 0..existing {
            let list = ivf::nearest_centroid(&self.centroids, self.dim, self.row(row));
            self.assignments.push(list as u32);
            self.lists[list].push(row);
        }
        self.trained = true;
        Ok(())
    }

    /// Append vectors with their metadata.
    pub fn add(&mut self, vectors: &[Vec<f32>], metadata: Vec<ChunkMetadata>) -> Result<()> {
        if vectors.len() != metadata.len() {
            return Err(Error::InvalidParameters(format!(
                "{} vectors but {} metadata entries",
                vectors.len(),
                metadata.len()
            )));
        }
        if !self.trained {
            return Err(Error::IndexNotTrained);
        }
        let flat = self.flatten(vectors)?;
        let start = self.len();
        self.vectors.extend_from_slice(&flat);
        self.metadata.extend(metadata);

        if matches!(self.topology, TopologyConfig::Ivf { .. }) {
            for row in start..self.len() {
                let list = ivf::nearest_centroid(&self.centroids, self.dim, self.row(row));
                self.assignments.push(list as u32);
                self.lists[list].push(row);
            }
        }
        Ok(())
    }

    /// The `k` nearest rows to `query`, nearest first. `k` is clamped to the
    /// number of stored vectors.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor<'_>>> {
        if !self.trained {
            return Err(Error::IndexNotTrained);
        }
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = match self.topology {
            TopologyConfig::Flat => (0..self.len())
                .map(|row| (row, squared_l2(self.row(row), query)))
                .collect(),
            TopologyConfig::Ivf { nprobe, .. } => {
                ivf::nearest_centroids(&self.centroids, self.dim, query, nprobe)
                    .into_iter()
                    .flat_map(|list| self.lists[list].iter().copied())
                    .map(|row| (row, squared_l2(self.row(row), query)))
                    .collect()
            }
        };
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(row, distance)| Neighbor {
                metadata: &self.metadata[row],
                distance,
                similarity: (-(distance as f64)).exp(),
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn topology(&self) -> TopologyConfig {
        self.topology
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn stats(&self) -> IndexStats {
        let (nlist, nprobe) = match self.topology {
            TopologyConfig::Flat => (None, None),
            TopologyConfig::Ivf { nlist, nprobe } => (Some(nlist), Some(nprobe)),
        };
        IndexStats {
            status: if self.is_empty() { "empty" } else { "loaded" }.to_string(),
            total_vectors: self.len(),
            dimension: self.dim,
            topology: self.topology.name().to_string(),
            nlist,
            nprobe,
            is_trained: self.trained,
        }
    }

    /// Paths of the two companion artifacts for `base`.
    pub fn artifact_paths(base: &Path) -> (PathBuf, PathBuf) {
        (with_suffix(base, ".index"), with_suffix(base, ".meta.json"))
    }

    /// Persist both artifacts next to `base`.
    pub fn save(&self, base: &Path) -> Result<()> {
        let (index_path, meta_path) = Self::artifact_paths(base);
        if let Some(parent) = index_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            topology: self.topology,
            dimension: self.dim,
            is_trained: self.trained,
            count: self.len(),
            kmeans_iterations: self.kmeans_iterations,
            metadata: self.metadata.clone(),
        };
        write_atomic(&index_path, &self.encode()?)?;
        write_atomic(&meta_path, &serde_json::to_vec(&manifest)?)?;
        tracing::debug!(path = %index_path.display(), vectors = self.len(), "saved vector index");
        Ok(())
    }

    /// Load both artifacts written by [`VectorIndex::save`].
    pub fn load(base: &Path) -> Result<Self> {
        let (index_path, meta_path) = Self::artifact_paths(base);
        for path in [&index_path, &meta_path] {
            if !path.exists() {
                return Err(Error::IndexFilesNotFound(path.clone()));
            }
        }

        let manifest: Manifest = serde_json::from_slice(&fs::read(&meta_path)?)
            .map_err(|e| Error::IndexCorrupt(format!("{}: {}", meta_path.display(), e)))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(Error::IndexCorrupt(format!(
                "metadata format version {} (expected {})",
                manifest.format_version, FORMAT_VERSION
            )));
        }
        if manifest.metadata.len() != manifest.count {
            return Err(Error::IndexCorrupt(format!(
                "metadata lists {} entries, count says {}",
                manifest.metadata.len(),
                manifest.count
            )));
        }

        let bytes = fs::read(&index_path)?;
        let mut index = Self::decode(&bytes)?;
        if index.topology != manifest.topology
            || index.dim != manifest.dimension
            || index.trained != manifest.is_trained
            || index.vectors.len() / index.dim.max(1) != manifest.count
        {
            return Err(Error::IndexCorrupt(format!(
                "{} and {} disagree",
                index_path.display(),
                meta_path.display()
            )));
        }
        index.metadata = manifest.metadata;
        index.kmeans_iterations = manifest.kmeans_iterations;
        Ok(index)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let (kind, nlist, nprobe) = match self.topology {
            TopologyConfig::Flat => (0u8, 0u64, 0u64),
            TopologyConfig::Ivf { nlist, nprobe } => (1u8, nlist as u64, nprobe as u64),
        };
        let header = IndexHeader {
            format_version: FORMAT_VERSION,
            kind,
            trained: self.trained,
            dim: self.dim as u64,
            count: self.len() as u64,
            nlist,
            nprobe,
            centroid_rows: (self.centroids.len() / self.dim) as u64,
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| Error::IndexCorrupt(format!("encode header: {}", e)))?;

        let mut out = Vec::with_capacity(
            12 + header_bytes.len() + (self.centroids.len() + self.assignments.len() + self.vectors.len()) * 4,
        );
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&vec_to_blob(&self.centroids));
        for a in &self.assignments {
            out.extend_from_slice(&a.to_le_bytes());
        }
        out.extend_from_slice(&vec_to_blob(&self.vectors));
        Ok(out)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let (header, payload) = read_header(bytes)?;
        if header.format_version != FORMAT_VERSION {
            return Err(Error::IndexCorrupt(format!(
                "index format version {} (expected {})",
                header.format_version, FORMAT_VERSION
            )));
        }

        let dim = to_usize(header.dim, "dimension")?;
        let count = to_usize(header.count, "count")?;
        let centroid_rows = to_usize(header.centroid_rows, "centroid rows")?;
        let topology = match header.kind {
            0 => TopologyConfig::Flat,
            1 => TopologyConfig::Ivf {
                nlist: to_usize(header.nlist, "nlist")?,
                nprobe: to_usize(header.nprobe, "nprobe")?,
            },
            other => return Err(Error::IndexCorrupt(format!("unknown topology tag {}", other))),
        };
        let mut index =
            Self::new(dim, topology).map_err(|e| Error::IndexCorrupt(e.to_string()))?;

        let assigned = if matches!(topology, TopologyConfig::Ivf { .. }) && header.trained {
            count
        } else {
            0
        };
        // Every section size is checked against the payload before anything is allocated.
        let centroid_bytes = byte_len(&[centroid_rows, dim, 4])?;
        let assignment_bytes = byte_len(&[assigned, 4])?;
        let vector_bytes = byte_len(&[count, dim, 4])?;
        let expected = centroid_bytes
            .checked_add(assignment_bytes)
            .and_then(|n| n.checked_add(vector_bytes))
            .ok_or_else(|| Error::IndexCorrupt("section sizes overflow".into()))?;
        if expected != payload.len() {
            return Err(Error::IndexCorrupt(format!(
                "header describes {} payload bytes, file has {}",
                expected,
                payload.len()
            )));
        }

        let (centroid_blob, rest) = payload.split_at(centroid_bytes);
        let (assignment_blob, vector_blob) = rest.split_at(assignment_bytes);
        let assignments: Vec<u32> = assignment_blob
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        if let TopologyConfig::Ivf { nlist, .. } = topology {
            if header.trained {
                if centroid_rows != nlist {
                    return Err(Error::IndexCorrupt(format!(
                        "{} centroids for nlist {}",
                        centroid_rows, nlist
                    )));
                }
                let mut lists = vec![Vec::new(); nlist];
                for (row, &list) in assignments.iter().enumerate() {
                    let slot = lists.get_mut(list as usize).ok_or_else(|| {
                        Error::IndexCorrupt(format!("row {} assigned to missing list {}", row, list))
                    })?;
                    slot.push(row);
                }
                index.lists = lists;
            }
        }

        index.trained = header.trained;
        index.centroids = blob_to_vec(centroid_blob);
        index.assignments = assignments;
        index.vectors = blob_to_vec(vector_blob);
        Ok(index)
    }

    fn row(&self, row: usize) -> &[f32] {
        &self.vectors[row * self.dim..(row + 1) * self.dim]
    }

    fn flatten(&self, vectors: &[Vec<f32>]) -> Result<Vec<f32>> {
        let mut flat = Vec::with_capacity(vectors.len() * self.dim);
        for v in vectors {
            if v.len() != self.dim {
                return Err(Error::DimensionMismatch {
                    expected: self.dim,
                    actual: v.len(),
                });
            }
            flat.extend_from_slice(v);
        }
        Ok(flat)
    }
}

/// Fixed fields of the `.index` file, bincode-encoded after the magic and a
/// little-endian `u64` length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexHeader {
    format_version: u32,
    /// 0 = flat, 1 = inverted file.
    kind: u8,
    trained: bool,
    dim: u64,
    count: u64,
    nlist: u64,
    nprobe: u64,
    centroid_rows: u64,
}

/// Upper bound on the encoded header; anything larger is corrupt.
const HEADER_LIMIT: usize = 256;

fn read_header(bytes: &[u8]) -> Result<(IndexHeader, &[u8])> {
    let truncated = || Error::IndexCorrupt("truncated index file".into());
    if bytes.get(..4).ok_or_else(truncated)? != MAGIC {
        return Err(Error::IndexCorrupt("bad magic".into()));
    }
    let len_bytes: [u8; 8] = bytes
        .get(4..12)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(truncated)?;
    let header_len = u64::from_le_bytes(len_bytes);
    if header_len > HEADER_LIMIT as u64 {
        return Err(Error::IndexCorrupt(format!("header length {} too large", header_len)));
    }
    let header_end = 12 + header_len as usize;
    let header_bytes = bytes.get(12..header_end).ok_or_else(truncated)?;

    let config = bincode::config::standard().with_limit::<HEADER_LIMIT>();
    let (header, used): (IndexHeader, usize) =
        bincode::serde::decode_from_slice(header_bytes, config)
            .map_err(|e| Error::IndexCorrupt(format!("index header: {}", e)))?;
    if used != header_bytes.len() {
        return Err(Error::IndexCorrupt("trailing bytes in index header".into()));
    }
    Ok((header, &bytes[header_end..]))
}

fn to_usize(value: u64, field: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::IndexCorrupt(format!("{} {} out of range", field, value)))
}

/// Product of `factors`, or `IndexCorrupt` on overflow.
fn byte_len(factors: &[usize]) -> Result<usize> {
    factors
        .iter()
        .try_fold(1usize, |acc, &f| acc.checked_mul(f))
        .ok_or_else(|| Error::IndexCorrupt("section size overflows".into()))
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s = base.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Write through a sibling temp file and rename into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = with_suffix(path, ".tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
