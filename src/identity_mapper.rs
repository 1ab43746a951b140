//! Concurrency-safe allocator from natural dataset identifiers to dense
//! sequential indices, with opt-in persistence of the mapping table.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use log::{debug, info};

use crate::record_reader::RecordReader;

/// Identifier exactly as it appears in the source dataset.
pub type NaturalId = i64;
/// Dense zero-based index handed to the downstream model pipeline.
pub type SequentialIndex = usize;

/// Entity kind a mapping table belongs to; decides the persisted column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Movie,
    User,
}

impl IdentityKind {
    pub fn natural_column(self) -> &'static str {
        match self {
            Self::Movie => "movieId",
            Self::User => "userId",
        }
    }

    pub fn index_column(self) -> &'static str {
        match self {
            Self::Movie => "iIdx",
            Self::User => "uIdx",
        }
    }
}

/// Point-in-time copy of a mapper's state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMapping {
    pub entries: HashMap<NaturalId, SequentialIndex>,
    pub next_index: SequentialIndex,
    pub changed: bool,
}

impl IdentityMapping {
    fn from_entries(entries: HashMap<NaturalId, SequentialIndex>) -> Self {
        let next_index = entries.values().max().map_or(0, |max| max + 1);
        Self {
            entries,
            next_index,
            changed: false,
        }
    }

    /// Pairs ordered by index ascending, the persisted order.
    pub fn sorted_pairs(&self) -> Vec<(NaturalId, SequentialIndex)> {
        let mut pairs: Vec<(NaturalId, SequentialIndex)> = self
            .entries
            .iter()
            .map(|(natural_id, index)| (*natural_id, *index))
            .collect();
        pairs.sort_by_key(|(_, index)| *index);
        pairs
    }
}

/// Shared allocator. Reads take a shared lock; allocation takes the exclusive
/// lock and re-checks before assigning so one identifier never gets two indices.
#[derive(Debug)]
pub struct IdentityMapper {
    kind: IdentityKind,
    state: RwLock<IdentityMapping>,
}

impl IdentityMapper {
    /// Empty mapper; the first allocation returns index 0.
    pub fn new(kind: IdentityKind) -> Self {
        Self::with_entries(kind, HashMap::new())
    }

    /// Seeds the mapper with an existing mapping; the watermark starts one past
    /// the highest seeded index.
    pub fn with_entries(kind: IdentityKind, entries: HashMap<NaturalId, SequentialIndex>) -> Self {
        Self {
            kind,
            state: RwLock::new(IdentityMapping::from_entries(entries)),
        }
    }

    /// Loads a persisted two-column table. Returns the mapper plus the number of
    /// rows skipped as malformed.
    pub fn load(kind: IdentityKind, path: &Path) -> Result<(Self, usize), String> {
        let mut reader = RecordReader::open(path)?;
        let natural_column = reader.column(kind.natural_column(), 0);
        let index_column = reader.column(kind.index_column(), 1);

        let mut entries: HashMap<NaturalId, SequentialIndex> = HashMap::new();
        let mut owners: HashMap<SequentialIndex, NaturalId> = HashMap::new();
        while let Some(row) = reader.next_row() {
            let (Some(natural_id), Some(index)) = (
                row.parse::<NaturalId>(natural_column),
                row.parse::<SequentialIndex>(index_column),
            ) else {
                reader.skip_row(&row, "unparseable identifier or index");
                continue;
            };
            if owners.get(&index).is_some_and(|owner| *owner != natural_id) {
                reader.skip_row(&row, "index already assigned to another identifier");
                continue;
            }
            if let Some(previous_index) = entries.insert(natural_id, index) {
                owners.remove(&previous_index);
            }
            owners.insert(index, natural_id);
        }

        reader.ensure_complete()?;

        debug!(
            "Loaded {} {} mappings from {}",
            entries.len(),
            kind.index_column(),
            path.display()
        );
        Ok((Self::with_entries(kind, entries), reader.rows_skipped()))
    }

    /// Existing index for `natural_id`, without allocating.
    pub fn get(&self, natural_id: NaturalId) -> Option<SequentialIndex> {
        let state = self.state.read().expect("identity mapping lock poisoned");
        state.entries.get(&natural_id).copied()
    }

    /// Existing index, or the next free one if `natural_id` is unseen.
    pub fn get_or_create(&self, natural_id: NaturalId) -> SequentialIndex {
        if let Some(index) = self.get(natural_id) {
            return index;
        }

        let mut state = self.state.write().expect("identity mapping lock poisoned");
        if let Some(index) = state.entries.get(&natural_id) {
            return *index;
        }
        let index = state.next_index;
        state.entries.insert(natural_id, index);
        state.next_index += 1;
        state.changed = true;
        index
    }

    /// `get_or_create` when `allocate` is set, plain `get` otherwise.
    pub fn resolve(&self, natural_id: NaturalId, allocate: bool) -> Option<SequentialIndex> {
        if allocate {
            Some(self.get_or_create(natural_id))
        } else {
            self.get(natural_id)
        }
    }

    /// True once any identifier has been allocated during this run.
    pub fn has_changed(&self) -> bool {
        self.state
            .read()
            .expect("identity mapping lock poisoned")
            .changed
    }

    pub fn snapshot(&self) -> IdentityMapping {
        self.state
            .read()
            .expect("identity mapping lock poisoned")
            .clone()
    }

    pub fn count(&self) -> usize {
        self.state
            .read()
            .expect("identity mapping lock poisoned")
            .entries
            .len()
    }

    /// Writes the table ordered by index ascending. The file is replaced
    /// through a sibling temp file so a failed write leaves the old table.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let pairs = self.snapshot().sorted_pairs();
        let temp_path = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&temp_path)
                .map_err(|error| format!("Failed to create {}: {error}", temp_path.display()))?;
            writer
                .write_record([self.kind.natural_column(), self.kind.index_column()])
                .map_err(|error| format!("Failed to write mapping header: {error}"))?;
            for (natural_id, index) in pairs {
                writer
                    .write_record([natural_id.to_string(), index.to_string()])
                    .map_err(|error| format!("Failed to write mapping row: {error}"))?;
            }
            writer
                .flush()
                .map_err(|error| format!("Failed to flush {}: {error}", temp_path.display()))?;
        }
        fs::rename(&temp_path, path).map_err(|error| {
            format!(
                "Failed to replace {} with {}: {error}",
                path.display(),
                temp_path.display()
            )
        })
    }

    /// Saves only when persistence was requested and something was allocated.
    /// Returns whether the table was written.
    pub fn persist_if_changed(&self, path: &Path, persist_requested: bool) -> Result<bool, String> {
        if !persist_requested || !self.has_changed() {
            return Ok(false);
        }
        self.save(path)?;
        info!(
            "Updated {} ({} {} mappings)",
            path.display(),
            self.count(),
            self.kind.index_column()
        );
        Ok(true)
    }
}
