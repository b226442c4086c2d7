use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::IndexError;
use crate::models::VectorEntry;

const INDEX_MAGIC: &[u8; 4] = b"HSVI";
const FORMAT_VERSION: u32 = 1;

/// Graph variant construction parameters.
const GRAPH_MAX_LINKS: usize = 16;
const GRAPH_EF_SEARCH: usize = 32;

/// Clustered variant parameters.
const CLUSTER_NLIST: usize = 100;
const CLUSTER_NPROBE: usize = 8;
const CLUSTER_TRAIN_ROUNDS: usize = 10;

/// The approximate-nearest-neighbor structure behind the store, chosen once
/// at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Exact brute-force inner product.
    Flat,
    /// Navigable-small-world graph.
    Graph,
    /// Inverted-file clustering.
    Clustered,
}

impl IndexKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Graph => "graph",
            Self::Clustered => "clustered",
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::Flat => 0,
            Self::Graph => 1,
            Self::Clustered => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, IndexError> {
        match tag {
            0 => Ok(Self::Flat),
            1 => Ok(Self::Graph),
            2 => Ok(Self::Clustered),
            other => Err(IndexError::Persist(format!("unknown index kind tag {other}"))),
        }
    }
}

impl std::str::FromStr for IndexKind {
    type Err = IndexError;

    fn from_str(value: &str) -> Result<Self, IndexError> {
        match value {
            "flat" => Ok(Self::Flat),
            "graph" => Ok(Self::Graph),
            "clustered" => Ok(Self::Clustered),
            other => Err(IndexError::Persist(format!("unknown index kind '{other}'"))),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(vector: &mut [f32]) {
    let magnitude = dot(vector, vector).sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

/// Score/id pair ordered for a max-heap: higher score wins, ties go to the
/// lower internal id so rankings are deterministic.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoredId {
    score: f32,
    id: u32,
}

impl Eq for ScoredId {}

impl Ord for ScoredId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for ScoredId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Row-major vector storage shared by every variant.
#[derive(Debug, Clone)]
struct VectorSlab {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorSlab {
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    fn push(&mut self, vector: &[f32]) {
        self.data.extend_from_slice(vector);
    }

    fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.data[start..start + self.dimension]
    }
}

fn brute_search(slab: &VectorSlab, query: &[f32], k: usize, skip: &HashSet<u32>) -> Vec<(u32, f32)> {
    let mut scored: Vec<(u32, f32)> = (0..slab.len() as u32)
        .filter(|id| !skip.contains(id))
        .map(|id| (id, dot(query, slab.vector(id))))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}

#[derive(Debug, Clone)]
struct GraphIndex {
    vectors: VectorSlab,
    links: Vec<Vec<u32>>,
    max_links: usize,
    ef_search: usize,
}

impl GraphIndex {
    fn new(dimension: usize) -> Self {
        Self {
            vectors: VectorSlab::new(dimension),
            links: Vec::new(),
            max_links: GRAPH_MAX_LINKS,
            ef_search: GRAPH_EF_SEARCH,
        }
    }

    fn insert(&mut self, vector: &[f32]) {
        let id = self.vectors.len() as u32;
        let neighbors = if id == 0 {
            Vec::new()
        } else {
            let ef = self.ef_search.max(self.max_links * 2);
            self.traverse(vector, ef)
        };

        self.vectors.push(vector);
        let chosen: Vec<u32> = neighbors
            .into_iter()
            .take(self.max_links)
            .map(|(neighbor, _)| neighbor)
            .collect();
        self.links.push(chosen.clone());

        for neighbor in chosen {
            let slot = neighbor as usize;
            self.links[slot].push(id);
            if self.links[slot].len() > self.max_links * 2 {
                self.prune(neighbor);
            }
        }
    }

    /// Keep a node's highest-similarity links when its degree grows too far.
    fn prune(&mut self, node: u32) {
        let base = self.vectors.vector(node).to_vec();
        let mut ranked: Vec<(u32, f32)> = self.links[node as usize]
            .iter()
            .map(|&other| (other, dot(&base, self.vectors.vector(other))))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.max_links * 2);
        self.links[node as usize] = ranked.into_iter().map(|(other, _)| other).collect();
    }

    /// Best-first traversal from the fixed entry point. Returns up to `ef`
    /// candidates sorted by descending score; tombstoned nodes are kept for
    /// connectivity and filtered by the caller.
    fn traverse(&self, query: &[f32], ef: usize) -> Vec<(u32, f32)> {
        if self.vectors.len() == 0 {
            return Vec::new();
        }

        let entry = ScoredId {
            score: dot(query, self.vectors.vector(0)),
            id: 0,
        };
        let mut visited: HashSet<u32> = HashSet::from([0]);
        let mut candidates = BinaryHeap::from([entry]);
        let mut found: BinaryHeap<Reverse<ScoredId>> = BinaryHeap::from([Reverse(entry)]);

        while let Some(current) = candidates.pop() {
            if found.len() >= ef {
                if let Some(Reverse(worst)) = found.peek() {
                    if current.score < worst.score {
                        break;
                    }
                }
            }

            for &neighbor in &self.links[current.id as usize] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let scored = ScoredId {
                    score: dot(query, self.vectors.vector(neighbor)),
                    id: neighbor,
                };
                let keep = found.len() < ef
                    || found
                        .peek()
                        .is_some_and(|Reverse(worst)| scored > *worst);
                if keep {
                    candidates.push(scored);
                    found.push(Reverse(scored));
                    if found.len() > ef {
                        found.pop();
                    }
                }
            }
        }

        let mut results: Vec<(u32, f32)> = found
            .into_iter()
            .map(|Reverse(scored)| (scored.id, scored.score))
            .collect();
        results.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        results
    }

    fn search(&self, query: &[f32], k: usize, skip: &HashSet<u32>) -> Vec<(u32, f32)> {
        // Exactness is required once k covers the whole live set.
        if k + skip.len() >= self.vectors.len() {
            return brute_search(&self.vectors, query, k, skip);
        }

        let ef = self.ef_search.max(k + skip.len());
        let mut results = self.traverse(query, ef);
        results.retain(|(id, _)| !skip.contains(id));
        results.truncate(k);
        results
    }
}

#[derive(Debug, Clone)]
struct ClusteredIndex {
    vectors: VectorSlab,
    centroids: VectorSlab,
    lists: Vec<Vec<u32>>,
    nlist: usize,
    nprobe: usize,
}

impl ClusteredIndex {
    fn new(dimension: usize) -> Self {
        Self {
            vectors: VectorSlab::new(dimension),
            centroids: VectorSlab::new(dimension),
            lists: Vec::new(),
            nlist: CLUSTER_NLIST,
            nprobe: CLUSTER_NPROBE,
        }
    }

    fn is_trained(&self) -> bool {
        self.centroids.len() > 0
    }

    /// Lloyd iterations over the first batch; centroids are fixed afterwards
    /// and later vectors are only assigned.
    fn train(&mut self, batch: &[Vec<f32>]) {
        let k = self.nlist.min(batch.len());
        if k == 0 {
            return;
        }
        if batch.len() < self.nlist {
            warn!(
                vectors = batch.len(),
                nlist = self.nlist,
                "training clustered index on fewer vectors than nlist"
            );
        }

        let dimension = self.vectors.dimension;
        let mut centroids: Vec<Vec<f32>> = batch[..k].iter().cloned().collect();

        for _ in 0..CLUSTER_TRAIN_ROUNDS {
            let mut sums = vec![vec![0f32; dimension]; k];
            let mut counts = vec![0usize; k];
            for vector in batch {
                let nearest = nearest_centroid(&centroids, vector);
                counts[nearest] += 1;
                for (slot, value) in sums[nearest].iter_mut().zip(vector) {
                    *slot += value;
                }
            }
            for (idx, sum) in sums.into_iter().enumerate() {
                if counts[idx] == 0 {
                    continue;
                }
                let mut centroid: Vec<f32> =
                    sum.into_iter().map(|v| v / counts[idx] as f32).collect();
                normalize(&mut centroid);
                centroids[idx] = centroid;
            }
        }

        for centroid in &centroids {
            self.centroids.push(centroid);
        }
        self.lists = vec![Vec::new(); k];
    }

    fn insert(&mut self, vector: &[f32]) {
        let id = self.vectors.len() as u32;
        self.vectors.push(vector);
        let list = nearest_centroid_slab(&self.centroids, vector);
        self.lists[list].push(id);
    }

    fn search(&self, query: &[f32], k: usize, skip: &HashSet<u32>) -> Vec<(u32, f32)> {
        if !self.is_trained() {
            return Vec::new();
        }
        if k + skip.len() >= self.vectors.len() {
            return brute_search(&self.vectors, query, k, skip);
        }

        let mut centroid_scores: Vec<(usize, f32)> = (0..self.centroids.len())
            .map(|idx| (idx, dot(query, self.centroids.vector(idx as u32))))
            .collect();
        centroid_scores.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut scored = Vec::new();
        for &(list, _) in centroid_scores.iter().take(self.nprobe) {
            for &id in &self.lists[list] {
                if !skip.contains(&id) {
                    scored.push((id, dot(query, self.vectors.vector(id))));
                }
            }
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }

    fn assignments(&self) -> Vec<u32> {
        let mut assignments = vec![0u32; self.vectors.len()];
        for (list, members) in self.lists.iter().enumerate() {
            for &id in members {
                assignments[id as usize] = list as u32;
            }
        }
        assignments
    }
}

fn nearest_centroid(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (idx, centroid) in centroids.iter().enumerate() {
        let score = dot(centroid, vector);
        if score > best_score {
            best = idx;
            best_score = score;
        }
    }
    best
}

fn nearest_centroid_slab(centroids: &VectorSlab, vector: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for idx in 0..centroids.len() {
        let score = dot(centroids.vector(idx as u32), vector);
        if score > best_score {
            best = idx;
            best_score = score;
        }
    }
    best
}

#[derive(Debug, Clone)]
enum AnnIndex {
    Flat(VectorSlab),
    Graph(GraphIndex),
    Clustered(ClusteredIndex),
}

impl AnnIndex {
    fn new(kind: IndexKind, dimension: usize) -> Self {
        match kind {
            IndexKind::Flat => Self::Flat(VectorSlab::new(dimension)),
            IndexKind::Graph => Self::Graph(GraphIndex::new(dimension)),
            IndexKind::Clustered => Self::Clustered(ClusteredIndex::new(dimension)),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Flat(slab) => slab.len(),
            Self::Graph(graph) => graph.vectors.len(),
            Self::Clustered(clustered) => clustered.vectors.len(),
        }
    }

    fn vector(&self, id: u32) -> &[f32] {
        match self {
            Self::Flat(slab) => slab.vector(id),
            Self::Graph(graph) => graph.vectors.vector(id),
            Self::Clustered(clustered) => clustered.vectors.vector(id),
        }
    }

    fn add(&mut self, vectors: &[Vec<f32>]) {
        match self {
            Self::Flat(slab) => {
                for vector in vectors {
                    slab.push(vector);
                }
            }
            Self::Graph(graph) => {
                for vector in vectors {
                    graph.insert(vector);
                }
            }
            Self::Clustered(clustered) => {
                if !clustered.is_trained() {
                    clustered.train(vectors);
                }
                for vector in vectors {
                    clustered.insert(vector);
                }
            }
        }
    }

    fn search(&self, query: &[f32], k: usize, skip: &HashSet<u32>) -> Vec<(u32, f32)> {
        match self {
            Self::Flat(slab) => brute_search(slab, query, k, skip),
            Self::Graph(graph) => graph.search(query, k, skip),
            Self::Clustered(clustered) => clustered.search(query, k, skip),
        }
    }
}

/// Persisted id-map artifact; always written and read together with the
/// vector blob as one atomic pair.
#[derive(Debug, Serialize, Deserialize)]
struct IdMapArtifact {
    model_id: String,
    dimension: usize,
    kind: IndexKind,
    entries: Vec<(u32, Uuid)>,
    tombstones: Vec<u32>,
}

/// Owns the ANN structure plus the chunk-id map with its tombstones.
///
/// Search is immediately consistent with `add`/`remove`. Internal ids are
/// stable until [`VectorIndexStore::compact`], which is the only operation
/// allowed to renumber them.
pub struct VectorIndexStore {
    ann: AnnIndex,
    kind: IndexKind,
    dimension: usize,
    model_id: String,
    forward: BTreeMap<u32, Uuid>,
    reverse: HashMap<Uuid, u32>,
    tombstones: HashSet<u32>,
}

impl VectorIndexStore {
    pub fn new(dimension: usize, kind: IndexKind, model_id: impl Into<String>) -> Self {
        Self {
            ann: AnnIndex::new(kind, dimension),
            kind,
            dimension,
            model_id: model_id.into(),
            forward: BTreeMap::new(),
            reverse: HashMap::new(),
            tombstones: HashSet::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Number of live (non-tombstoned) vectors.
    pub fn len(&self) -> usize {
        self.ann.len() - self.tombstones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, chunk_id: &Uuid) -> bool {
        self.reverse.contains_key(chunk_id)
    }

    /// Live chunk↔slot links, ascending by internal id.
    pub fn entries(&self) -> Vec<VectorEntry> {
        self.forward
            .iter()
            .filter(|(id, _)| !self.tombstones.contains(id))
            .map(|(&vector_id, &chunk_id)| VectorEntry {
                chunk_id,
                vector_id,
                model_id: self.model_id.clone(),
            })
            .collect()
    }

    /// Appends vectors, L2-normalizing internally so inner product equals
    /// cosine similarity. Re-adding a chunk id tombstones its previous slot.
    pub fn add(&mut self, chunk_ids: &[Uuid], vectors: Vec<Vec<f32>>) -> Result<(), IndexError> {
        if chunk_ids.len() != vectors.len() {
            return Err(IndexError::Store(format!(
                "got {} chunk ids for {} vectors",
                chunk_ids.len(),
                vectors.len()
            )));
        }
        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
        }
        if chunk_ids.is_empty() {
            return Ok(());
        }

        let mut normalized = vectors;
        for vector in &mut normalized {
            normalize(vector);
        }

        for chunk_id in chunk_ids {
            if let Some(old) = self.reverse.remove(chunk_id) {
                self.tombstones.insert(old);
            }
        }

        let start = self.ann.len() as u32;
        self.ann.add(&normalized);
        for (offset, chunk_id) in chunk_ids.iter().enumerate() {
            let vector_id = start + offset as u32;
            self.forward.insert(vector_id, *chunk_id);
            self.reverse.insert(*chunk_id, vector_id);
        }

        info!(
            added = chunk_ids.len(),
            live = self.len(),
            kind = self.kind.as_str(),
            "added vectors"
        );
        Ok(())
    }

    /// Ranked live results, descending cosine score, ties broken by
    /// ascending internal id. `k` beyond the live count returns everything.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Uuid, f32)>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut normalized = query.to_vec();
        normalize(&mut normalized);

        let k = k.min(self.len());
        let hits = self.ann.search(&normalized, k, &self.tombstones);
        Ok(hits
            .into_iter()
            .map(|(id, score)| (self.forward[&id], score))
            .collect())
    }

    /// Logical delete: tombstoned slots disappear from every subsequent
    /// search immediately, without touching the structure.
    pub fn remove(&mut self, chunk_ids: &[Uuid]) {
        let mut removed = 0usize;
        for chunk_id in chunk_ids {
            if let Some(id) = self.reverse.remove(chunk_id) {
                self.tombstones.insert(id);
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, live = self.len(), "tombstoned vectors");
        }
    }

    /// Rebuilds the structure from live vectors only, reclaiming tombstoned
    /// slots. The only operation that changes internal ids.
    pub fn compact(&mut self) {
        let live: Vec<(Uuid, Vec<f32>)> = self
            .forward
            .iter()
            .filter(|(id, _)| !self.tombstones.contains(id))
            .map(|(&id, &chunk_id)| (chunk_id, self.ann.vector(id).to_vec()))
            .collect();

        let reclaimed = self.tombstones.len();
        self.ann = AnnIndex::new(self.kind, self.dimension);
        self.forward.clear();
        self.reverse.clear();
        self.tombstones.clear();

        let vectors: Vec<Vec<f32>> = live.iter().map(|(_, v)| v.clone()).collect();
        self.ann.add(&vectors);
        for (offset, (chunk_id, _)) in live.iter().enumerate() {
            self.forward.insert(offset as u32, *chunk_id);
            self.reverse.insert(*chunk_id, offset as u32);
        }

        info!(live = self.len(), reclaimed, "compacted vector index");
    }

    pub fn clear(&mut self) {
        self.ann = AnnIndex::new(self.kind, self.dimension);
        self.forward.clear();
        self.reverse.clear();
        self.tombstones.clear();
    }

    /// Persist the structure and the id map as one atomic pair: both files
    /// are staged next to their targets and renamed into place together.
    pub fn save(&self, index_path: &Path, map_path: &Path) -> Result<(), IndexError> {
        let blob = self.encode_blob();
        let map = IdMapArtifact {
            model_id: self.model_id.clone(),
            dimension: self.dimension,
            kind: self.kind,
            entries: self.forward.iter().map(|(&id, &chunk)| (id, chunk)).collect(),
            tombstones: {
                let mut sorted: Vec<u32> = self.tombstones.iter().copied().collect();
                sorted.sort_unstable();
                sorted
            },
        };

        let index_tmp = staging_path(index_path);
        let map_tmp = staging_path(map_path);
        fs::write(&index_tmp, &blob)?;
        fs::write(&map_tmp, serde_json::to_vec_pretty(&map)?)?;
        fs::rename(&index_tmp, index_path)?;
        fs::rename(&map_tmp, map_path)?;

        info!(
            vectors = self.ann.len(),
            live = self.len(),
            path = %index_path.display(),
            "saved vector index"
        );
        Ok(())
    }

    /// Restore a previously saved pair. Missing files leave the store empty;
    /// artifacts that disagree with this store's dimension, model, or kind
    /// fail with `IndexConfigMismatch` instead of silently proceeding.
    pub fn load(&mut self, index_path: &Path, map_path: &Path) -> Result<(), IndexError> {
        if !index_path.exists() || !map_path.exists() {
            warn!(
                index = %index_path.display(),
                map = %map_path.display(),
                "index artifacts not found, starting empty"
            );
            return Ok(());
        }

        let map: IdMapArtifact = serde_json::from_slice(&fs::read(map_path)?)?;
        if map.dimension != self.dimension || map.model_id != self.model_id || map.kind != self.kind
        {
            return Err(IndexError::IndexConfigMismatch {
                expected: format!(
                    "dimension={} model={} kind={}",
                    self.dimension,
                    self.model_id,
                    self.kind.as_str()
                ),
                stored: format!(
                    "dimension={} model={} kind={}",
                    map.dimension,
                    map.model_id,
                    map.kind.as_str()
                ),
            });
        }

        let blob = fs::read(index_path)?;
        let ann = self.decode_blob(&blob)?;

        let count = ann.len();
        for &(id, _) in &map.entries {
            if id as usize >= count {
                return Err(IndexError::Persist(format!(
                    "id map references slot {id} beyond {count} stored vectors"
                )));
            }
        }

        self.ann = ann;
        self.tombstones = map.tombstones.iter().copied().collect();
        self.forward = map.entries.iter().copied().collect();
        self.reverse = map
            .entries
            .iter()
            .filter(|(id, _)| !self.tombstones.contains(id))
            .map(|&(id, chunk)| (chunk, id))
            .collect();

        info!(
            vectors = count,
            live = self.len(),
            path = %index_path.display(),
            "loaded vector index"
        );
        Ok(())
    }

    fn encode_blob(&self) -> Vec<u8> {
        let count = self.ann.len();
        let mut buf = Vec::new();
        buf.extend_from_slice(INDEX_MAGIC);
        put_u32(&mut buf, FORMAT_VERSION);
        buf.push(self.kind.tag());
        put_u32(&mut buf, self.dimension as u32);
        put_u64(&mut buf, count as u64);
        for id in 0..count as u32 {
            for value in self.ann.vector(id) {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }

        match &self.ann {
            AnnIndex::Flat(_) => {}
            AnnIndex::Graph(graph) => {
                put_u32(&mut buf, graph.max_links as u32);
                put_u32(&mut buf, graph.ef_search as u32);
                for links in &graph.links {
                    put_u32(&mut buf, links.len() as u32);
                    for &link in links {
                        put_u32(&mut buf, link);
                    }
                }
            }
            AnnIndex::Clustered(clustered) => {
                put_u32(&mut buf, clustered.nlist as u32);
                put_u32(&mut buf, clustered.nprobe as u32);
                put_u64(&mut buf, clustered.centroids.len() as u64);
                buf.extend(
                    clustered
                        .centroids
                        .data
                        .iter()
                        .flat_map(|value| value.to_le_bytes()),
                );
                for assignment in clustered.assignments() {
                    put_u32(&mut buf, assignment);
                }
            }
        }

        buf
    }

    fn decode_blob(&self, blob: &[u8]) -> Result<AnnIndex, IndexError> {
        let mut cursor = Cursor::new(blob);
        if cursor.take(4)? != INDEX_MAGIC {
            return Err(IndexError::Persist("bad index magic".to_string()));
        }
        let version = cursor.u32()?;
        if version != FORMAT_VERSION {
            return Err(IndexError::Persist(format!(
                "unsupported index format version {version}"
            )));
        }
        let kind = IndexKind::from_tag(cursor.u8()?)?;
        let dimension = cursor.u32()? as usize;
        if kind != self.kind || dimension != self.dimension {
            return Err(IndexError::IndexConfigMismatch {
                expected: format!("dimension={} kind={}", self.dimension, self.kind.as_str()),
                stored: format!("dimension={dimension} kind={}", kind.as_str()),
            });
        }

        let count = cursor.u64()? as usize;
        let total = count
            .checked_mul(dimension)
            .ok_or_else(|| IndexError::Persist("vector count overflows".to_string()))?;
        let data = cursor.f32s(total)?;
        let slab = VectorSlab { dimension, data };

        match kind {
            IndexKind::Flat => Ok(AnnIndex::Flat(slab)),
            IndexKind::Graph => {
                let max_links = cursor.u32()? as usize;
                let ef_search = cursor.u32()? as usize;
                let mut links = Vec::with_capacity(count);
                for _ in 0..count {
                    let degree = cursor.u32()? as usize;
                    let mut node_links = Vec::with_capacity(degree);
                    for _ in 0..degree {
                        let link = cursor.u32()?;
                        if link as usize >= count {
                            return Err(IndexError::Persist(format!(
                                "graph link {link} beyond {count} vectors"
                            )));
                        }
                        node_links.push(link);
                    }
                    links.push(node_links);
                }
                Ok(AnnIndex::Graph(GraphIndex {
                    vectors: slab,
                    links,
                    max_links,
                    ef_search,
                }))
            }
            IndexKind::Clustered => {
                let nlist = cursor.u32()? as usize;
                let nprobe = cursor.u32()? as usize;
                let centroid_count = cursor.u64()? as usize;
                let centroid_total = centroid_count
                    .checked_mul(dimension)
                    .ok_or_else(|| IndexError::Persist("centroid count overflows".to_string()))?;
                let centroid_data = cursor.f32s(centroid_total)?;
                let mut lists = vec![Vec::new(); centroid_count];
                for id in 0..count as u32 {
                    let list = cursor.u32()? as usize;
                    if list >= centroid_count && centroid_count > 0 {
                        return Err(IndexError::Persist(format!(
                            "assignment {list} beyond {centroid_count} centroids"
                        )));
                    }
                    if centroid_count > 0 {
                        lists[list].push(id);
                    }
                }
                Ok(AnnIndex::Clustered(ClusteredIndex {
                    vectors: slab,
                    centroids: VectorSlab {
                        dimension,
                        data: centroid_data,
                    },
                    lists,
                    nlist,
                    nprobe,
                }))
            }
        }
    }
}

fn staging_path(path: &Path) -> std::path::PathBuf {
    let mut staged = path.as_os_str().to_os_string();
    staged.push(".tmp");
    std::path::PathBuf::from(staged)
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], IndexError> {
        if self.buf.len().saturating_sub(self.pos) < n {
            return Err(IndexError::Persist("truncated index blob".to_string()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, IndexError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, IndexError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64, IndexError> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    }

    fn f32s(&mut self, n: usize) -> Result<Vec<f32>, IndexError> {
        let total = n
            .checked_mul(4)
            .ok_or_else(|| IndexError::Persist("float count overflows".to_string()))?;
        let bytes = self.take(total)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    /// Axis-aligned unit vectors make expected rankings obvious.
    fn axis(dimension: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimension];
        v[axis] = 1.0;
        v
    }

    fn store_with_axes(kind: IndexKind, n: usize) -> VectorIndexStore {
        let mut store = VectorIndexStore::new(8, kind, "char-ngram-8");
        let ids: Vec<Uuid> = (0..n as u128).map(id).collect();
        let vectors: Vec<Vec<f32>> = (0..n).map(|i| axis(8, i % 8)).collect();
        store.add(&ids, vectors).unwrap();
        store
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut store = VectorIndexStore::new(4, IndexKind::Flat, "m");
        let result = store.add(&[id(1)], vec![vec![1.0, 0.0]]);
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch {
                expected: 4,
                actual: 2
            })
        ));

        let query = vec![0.0; 3];
        assert!(matches!(
            store.search(&query, 5),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn add_is_immediately_searchable() {
        let mut store = VectorIndexStore::new(4, IndexKind::Flat, "m");
        store.add(&[id(1)], vec![vec![1.0, 0.0, 0.0, 0.0]]).unwrap();

        let hits = store.search(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, id(1));
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn scores_are_cosine_regardless_of_input_magnitude() {
        let mut store = VectorIndexStore::new(2, IndexKind::Flat, "m");
        // Same direction, wildly different magnitude.
        store
            .add(&[id(1), id(2)], vec![vec![10.0, 0.0], vec![0.0, 0.2]])
            .unwrap();

        let hits = store.search(&[5.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].0, id(1));
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert!(hits[1].1.abs() < 1e-6);
    }

    #[test]
    fn ties_break_by_ascending_internal_id() {
        let mut store = VectorIndexStore::new(2, IndexKind::Flat, "m");
        let duplicate = vec![1.0, 0.0];
        store
            .add(
                &[id(7), id(3), id(5)],
                vec![duplicate.clone(), duplicate.clone(), duplicate],
            )
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 3).unwrap();
        // Insertion order, not uuid order.
        assert_eq!(
            hits.iter().map(|(chunk, _)| *chunk).collect::<Vec<_>>(),
            vec![id(7), id(3), id(5)]
        );
    }

    #[test]
    fn oversized_k_returns_all_live() {
        for kind in [IndexKind::Flat, IndexKind::Graph, IndexKind::Clustered] {
            let store = store_with_axes(kind, 6);
            let hits = store.search(&axis(8, 0), 100).unwrap();
            assert_eq!(hits.len(), 6, "kind {kind:?}");
        }
    }

    #[test]
    fn remove_hides_vectors_immediately() {
        for kind in [IndexKind::Flat, IndexKind::Graph, IndexKind::Clustered] {
            let mut store = store_with_axes(kind, 6);
            store.remove(&[id(0), id(1)]);

            assert_eq!(store.len(), 4);
            assert!(!store.contains(&id(0)));
            let hits = store.search(&axis(8, 0), 10).unwrap();
            assert!(
                hits.iter().all(|(chunk, _)| *chunk != id(0) && *chunk != id(1)),
                "kind {kind:?}"
            );
        }
    }

    #[test]
    fn readding_a_chunk_keeps_one_live_entry() {
        let mut store = VectorIndexStore::new(2, IndexKind::Flat, "m");
        store.add(&[id(1)], vec![vec![1.0, 0.0]]).unwrap();
        store.add(&[id(1)], vec![vec![0.0, 1.0]]).unwrap();

        assert_eq!(store.len(), 1);
        let entries = store.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].chunk_id, id(1));
        assert_eq!(entries[0].vector_id, 1);
        assert_eq!(entries[0].model_id, "m");

        // Only the new direction is found.
        let hits = store.search(&[0.0, 1.0], 1).unwrap();
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn compact_reclaims_tombstones_and_renumbers() {
        let mut store = store_with_axes(IndexKind::Flat, 6);
        store.remove(&[id(0), id(2), id(4)]);
        let before = store.search(&axis(8, 1), 10).unwrap();

        store.compact();

        assert_eq!(store.len(), 3);
        assert_eq!(store.entries().len(), 3);
        assert!(store.entries().iter().all(|e| e.vector_id < 3));
        let after = store.search(&axis(8, 1), 10).unwrap();
        assert_eq!(
            before.iter().map(|(c, _)| *c).collect::<Vec<_>>(),
            after.iter().map(|(c, _)| *c).collect::<Vec<_>>()
        );
    }

    #[test]
    fn clear_resets_everything() {
        let mut store = store_with_axes(IndexKind::Flat, 4);
        store.clear();
        assert!(store.is_empty());
        assert!(store.search(&axis(8, 0), 5).unwrap().is_empty());
    }

    #[test]
    fn save_load_reproduces_rankings() {
        for kind in [IndexKind::Flat, IndexKind::Graph, IndexKind::Clustered] {
            let dir = tempdir().unwrap();
            let index_path = dir.path().join("vectors.index");
            let map_path = dir.path().join("vectors.map");

            let mut store = store_with_axes(kind, 20);
            store.remove(&[id(3)]);
            let query = axis(8, 2);
            let before = store.search(&query, 10).unwrap();
            store.save(&index_path, &map_path).unwrap();

            let mut restored = VectorIndexStore::new(8, kind, "char-ngram-8");
            restored.load(&index_path, &map_path).unwrap();

            assert_eq!(restored.len(), store.len(), "kind {kind:?}");
            let after = restored.search(&query, 10).unwrap();
            assert_eq!(before, after, "kind {kind:?}");
        }
    }

    #[test]
    fn load_rejects_mismatched_configuration() {
        let dir = tempdir().unwrap();
        let index_path = dir.path().join("vectors.index");
        let map_path = dir.path().join("vectors.map");

        let store = store_with_axes(IndexKind::Flat, 4);
        store.save(&index_path, &map_path).unwrap();

        let mut wrong_model = VectorIndexStore::new(8, IndexKind::Flat, "other-model");
        assert!(matches!(
            wrong_model.load(&index_path, &map_path),
            Err(IndexError::IndexConfigMismatch { .. })
        ));

        let mut wrong_dim = VectorIndexStore::new(16, IndexKind::Flat, "char-ngram-8");
        assert!(matches!(
            wrong_dim.load(&index_path, &map_path),
            Err(IndexError::IndexConfigMismatch { .. })
        ));

        let mut wrong_kind = VectorIndexStore::new(8, IndexKind::Graph, "char-ngram-8");
        assert!(matches!(
            wrong_kind.load(&index_path, &map_path),
            Err(IndexError::IndexConfigMismatch { .. })
        ));
    }

    #[test]
    fn load_rejects_corrupt_blob() {
        let dir = tempdir().unwrap();
        let index_path = dir.path().join("vectors.index");
        let map_path = dir.path().join("vectors.map");

        let store = store_with_axes(IndexKind::Flat, 4);
        store.save(&index_path, &map_path).unwrap();
        std::fs::write(&index_path, b"HSVI garbage").unwrap();

        let mut restored = VectorIndexStore::new(8, IndexKind::Flat, "char-ngram-8");
        assert!(matches!(
            restored.load(&index_path, &map_path),
            Err(IndexError::Persist(_))
        ));
    }

    #[test]
    fn missing_artifacts_leave_the_store_empty() {
        let dir = tempdir().unwrap();
        let mut store = VectorIndexStore::new(8, IndexKind::Flat, "m");
        store
            .load(&dir.path().join("nope.index"), &dir.path().join("nope.map"))
            .unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn graph_finds_nearest_in_larger_collection() {
        let mut store = VectorIndexStore::new(8, IndexKind::Graph, "m");
        let ids: Vec<Uuid> = (0..64u128).map(id).collect();
        // Deterministic pseudo-random directions plus one known target.
        let mut vectors: Vec<Vec<f32>> = (0..63)
            .map(|i| {
                let mut v: Vec<f32> = (0..8)
                    .map(|j| (((i * 31 + j * 17) % 13) as f32) - 6.0)
                    .collect();
                normalize(&mut v);
                v
            })
            .collect();
        vectors.push(axis(8, 5));
        store.add(&ids, vectors).unwrap();

        let hits = store.search(&axis(8, 5), 4).unwrap();
        assert_eq!(hits[0].0, id(63));
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn clustered_assigns_after_training() {
        let mut store = VectorIndexStore::new(8, IndexKind::Clustered, "m");
        let first: Vec<Uuid> = (0..10u128).map(id).collect();
        store
            .add(&first, (0..10).map(|i| axis(8, i % 8)).collect())
            .unwrap();

        // Second batch arrives after training.
        store.add(&[id(100)], vec![axis(8, 3)]).unwrap();
        let hits = store.search(&axis(8, 3), 3).unwrap();
        assert!(hits.iter().any(|(chunk, _)| *chunk == id(100)));
    }
}
