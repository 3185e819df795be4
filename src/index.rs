//! Read-only index over secondary-source candidates.
//!
//! Built once per run. Exact `(volume, first page)` keys resolve in O(1);
//! the volume and year maps give ordered windows for the fuzzy scan. Titles
//! are normalized at build time so the scan only scores.

use crate::model::CandidateRecord;
use crate::normalize::normalize;
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use tracing::{debug, warn};

/// A candidate with its precomputed comparison title.
#[derive(Debug, Clone)]
pub struct IndexedCandidate {
    record: CandidateRecord,
    normalized_title: String,
}

impl IndexedCandidate {
    pub fn record(&self) -> &CandidateRecord {
        &self.record
    }

    pub fn normalized_title(&self) -> &str {
        &self.normalized_title
    }
}

/// Immutable lookup structure over all candidates of one run.
#[derive(Debug, Default)]
pub struct CandidateIndex {
    entries: Vec<IndexedCandidate>,
    by_key: HashMap<(u32, u32), usize>,
    by_volume: BTreeMap<u32, Vec<usize>>,
    by_year: BTreeMap<i32, Vec<usize>>,
    duplicate_keys: usize,
}

impl CandidateIndex {
    /// Build the index.
    ///
    /// When two candidates share a `(volume, first page)` key the first one
    /// keeps the key; both stay reachable through the scans.
    pub fn build(records: impl IntoIterator<Item = CandidateRecord>) -> Self {
        let mut index = Self::default();

        for record in records {
            let position = index.entries.len();

            if let (Some(volume), Some(page)) = (record.volume, record.first_page()) {
                if let Some(&existing) = index.by_key.get(&(volume, page)) {
                    warn!(
                        volume,
                        page,
                        kept = %index.entries[existing].record.source_id,
                        dropped = %record.source_id,
                        "Duplicate candidate key"
                    );
                    index.duplicate_keys += 1;
                } else {
                    index.by_key.insert((volume, page), position);
                }
            }
            if let Some(volume) = record.volume {
                index.by_volume.entry(volume).or_default().push(position);
            }
            if let Some(year) = record.year {
                index.by_year.entry(year).or_default().push(position);
            }

            let normalized_title = normalize(&record.title);
            index.entries.push(IndexedCandidate {
                record,
                normalized_title,
            });
        }

        debug!(
            candidates = index.entries.len(),
            keys = index.by_key.len(),
            volumes = index.by_volume.len(),
            "Built candidate index"
        );
        index
    }

    /// Candidate keyed by `(volume, first page)`.
    pub fn lookup_by_key(&self, volume: u32, page: u32) -> Option<&IndexedCandidate> {
        self.by_key.get(&(volume, page)).map(|&i| &self.entries[i])
    }

    /// Candidates whose volume lies in `volumes`, by ascending volume then
    /// load order. Candidates without a volume are never returned.
    pub fn iter_candidates(
        &self,
        volumes: RangeInclusive<u32>,
    ) -> impl Iterator<Item = &IndexedCandidate> + '_ {
        let window = if volumes.start() <= volumes.end() {
            Some(self.by_volume.range(volumes))
        } else {
            None
        };
        window
            .into_iter()
            .flatten()
            .flat_map(move |(_, positions)| positions.iter().map(move |&i| &self.entries[i]))
    }

    /// Same as [`iter_candidates`](Self::iter_candidates) on the year axis.
    pub fn iter_candidates_by_year(
        &self,
        years: RangeInclusive<i32>,
    ) -> impl Iterator<Item = &IndexedCandidate> + '_ {
        let window = if years.start() <= years.end() {
            Some(self.by_year.range(years))
        } else {
            None
        };
        window
            .into_iter()
            .flatten()
            .flat_map(move |(_, positions)| positions.iter().map(move |&i| &self.entries[i]))
    }

    /// Every candidate in load order.
    pub fn iter_all(&self) -> impl Iterator<Item = &IndexedCandidate> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of candidates that lost their key to an earlier duplicate.
    pub fn duplicate_keys(&self) -> usize {
        self.duplicate_keys
    }
}
