//! Candidate matching.
//!
//! One matcher serves every source. A source differs only in its
//! [`MatchConfig`]: whether its `(volume, page)` keys can be trusted, how far
//! the fuzzy scan may drift on the volume or year axis, and how similar a
//! title must be.
//!
//! Matching is a pure function of the record, the index and the config. The
//! only outside input is the optional [`AmbiguityResolver`], consulted for
//! ties the deterministic tie-break cannot settle.

use crate::index::{CandidateIndex, IndexedCandidate};
use crate::model::{AuthoritativeRecord, CandidateRecord};
use crate::normalize::normalize;
use crate::similarity::similarity;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;

/// Which lookups the matcher may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Exact `(volume, page)` key only
    StrictKey,
    /// Exact key first, fuzzy title scan when the key misses
    #[default]
    KeyThenFuzzy,
    /// Fuzzy title scan only
    FuzzyOnly,
}

/// Axis the fuzzy scan window is measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceAxis {
    #[default]
    Volume,
    Year,
}

/// Matching configuration, fixed for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub strategy: MatchStrategy,
    /// Minimum title similarity for a fuzzy match
    pub fuzzy_threshold: f64,
    /// If set, an exact key hit must also reach this title similarity
    pub confirm_key_threshold: Option<f64>,
    /// Maximum distance on the tolerance axis
    pub tolerance: u32,
    pub tolerance_axis: ToleranceAxis,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            strategy: MatchStrategy::default(),
            fuzzy_threshold: 0.4,
            confirm_key_threshold: None,
            tolerance: 2,
            tolerance_axis: ToleranceAxis::default(),
        }
    }
}

impl MatchConfig {
    /// Set the fuzzy threshold, clamped to `[0.0, 1.0]`.
    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Require a title check on key hits, clamped to `[0.0, 1.0]`.
    pub fn with_confirm_key_threshold(mut self, threshold: f64) -> Self {
        self.confirm_key_threshold = Some(threshold.clamp(0.0, 1.0));
        self
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_tolerance(mut self, tolerance: u32, axis: ToleranceAxis) -> Self {
        self.tolerance = tolerance;
        self.tolerance_axis = axis;
        self
    }
}

/// How a match was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMethod {
    #[serde(rename = "exact-key")]
    ExactKey,
    #[serde(rename = "fuzzy-title")]
    FuzzyTitle,
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMethod::ExactKey => f.write_str("exact-key"),
            MatchMethod::FuzzyTitle => f.write_str("fuzzy-title"),
        }
    }
}

/// A candidate that cleared the threshold.
#[derive(Debug, Clone, Copy)]
pub struct ScoredCandidate<'a> {
    pub candidate: &'a CandidateRecord,
    pub score: f64,
    /// Distance from the record on the tolerance axis
    pub delta: u32,
}

/// Outcome of matching one record.
#[derive(Debug, Clone)]
pub struct MatchResult<'a> {
    pub candidate: Option<&'a CandidateRecord>,
    /// Title similarity of the chosen candidate, or of the tied group
    pub score: f64,
    pub method: Option<MatchMethod>,
    /// More than one candidate cleared the threshold
    pub ambiguous: bool,
    /// Candidates sharing the best rank; above one means the tie-break failed
    pub tied: usize,
    /// The winner was picked by an operator
    pub resolved_by_operator: bool,
}

impl<'a> MatchResult<'a> {
    fn no_match() -> Self {
        Self {
            candidate: None,
            score: 0.0,
            method: None,
            ambiguous: false,
            tied: 0,
            resolved_by_operator: false,
        }
    }

    fn exact(candidate: &'a CandidateRecord, score: f64) -> Self {
        Self {
            candidate: Some(candidate),
            score,
            method: Some(MatchMethod::ExactKey),
            ambiguous: false,
            tied: 1,
            resolved_by_operator: false,
        }
    }

    pub fn is_match(&self) -> bool {
        self.candidate.is_some()
    }

    /// Several candidates tied and nobody picked one.
    pub fn is_unresolved_tie(&self) -> bool {
        self.candidate.is_none() && self.tied > 1
    }
}

/// Capability to settle a tie the matcher cannot break.
///
/// Implementations may block on an operator. The reconciler only calls
/// resolvers that report [`is_interactive`](Self::is_interactive) and only
/// when the run is configured as interactive.
pub trait AmbiguityResolver {
    /// Index into `tied` of the chosen candidate, or `None` to skip the record.
    fn resolve(&self, record: &AuthoritativeRecord, tied: &[ScoredCandidate<'_>]) -> Option<usize>;

    /// True if an operator is attached.
    fn is_interactive(&self) -> bool {
        false
    }
}

/// Default resolver: every tie becomes "no match".
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipAmbiguous;

impl AmbiguityResolver for SkipAmbiguous {
    fn resolve(&self, _record: &AuthoritativeRecord, _tied: &[ScoredCandidate<'_>]) -> Option<usize> {
        None
    }
}

/// Match `record` against `index`, normalizing its title first.
pub fn match_record<'a>(
    record: &AuthoritativeRecord,
    index: &'a CandidateIndex,
    config: &MatchConfig,
    resolver: Option<&dyn AmbiguityResolver>,
) -> MatchResult<'a> {
    match_normalized(record, &normalize(&record.title), index, config, resolver)
}

/// Match with a title the caller already normalized.
pub fn match_normalized<'a>(
    record: &AuthoritativeRecord,
    normalized_title: &str,
    index: &'a CandidateIndex,
    config: &MatchConfig,
    resolver: Option<&dyn AmbiguityResolver>,
) -> MatchResult<'a> {
    if config.strategy != MatchStrategy::FuzzyOnly {
        if let Some(result) = match_key(record, normalized_title, index, config) {
            return result;
        }
        if config.strategy == MatchStrategy::StrictKey {
            return MatchResult::no_match();
        }
    }
    match_fuzzy(record, normalized_title, index, config, resolver)
}

fn match_key<'a>(
    record: &AuthoritativeRecord,
    normalized_title: &str,
    index: &'a CandidateIndex,
    config: &MatchConfig,
) -> Option<MatchResult<'a>> {
    let volume = record.volume?;
    let page = record.page_range?.start;
    let hit = index.lookup_by_key(volume, page)?;

    let Some(threshold) = config.confirm_key_threshold else {
        debug!(recid = %record.recid, volume, page, candidate = %hit.record().source_id, "Exact key hit");
        return Some(MatchResult::exact(hit.record(), 1.0));
    };

    let score = similarity(normalized_title, hit.normalized_title());
    if score >= threshold {
        debug!(recid = %record.recid, volume, page, score, "Exact key hit confirmed by title");
        Some(MatchResult::exact(hit.record(), score))
    } else {
        debug!(
            recid = %record.recid,
            volume,
            page,
            score,
            threshold,
            candidate = %hit.record().source_id,
            "Exact key hit rejected by title check"
        );
        None
    }
}

fn match_fuzzy<'a>(
    record: &AuthoritativeRecord,
    normalized_title: &str,
    index: &'a CandidateIndex,
    config: &MatchConfig,
    resolver: Option<&dyn AmbiguityResolver>,
) -> MatchResult<'a> {
    let mut qualified: Vec<ScoredCandidate<'a>> = scan_window(record, index, config)
        .filter_map(|(entry, delta)| {
            let score = similarity(normalized_title, entry.normalized_title());
            (score >= config.fuzzy_threshold).then_some(ScoredCandidate {
                candidate: entry.record(),
                score,
                delta,
            })
        })
        .collect();

    if qualified.is_empty() {
        debug!(recid = %record.recid, threshold = config.fuzzy_threshold, "No candidate above threshold");
        return MatchResult::no_match();
    }

    // Stable sort keeps index order inside each rank.
    qualified.sort_by(rank);
    let best = qualified[0];
    let tied: Vec<ScoredCandidate<'a>> = qualified
        .iter()
        .take_while(|c| rank(c, &best) == Ordering::Equal)
        .copied()
        .collect();
    let ambiguous = qualified.len() > 1;

    debug!(
        recid = %record.recid,
        qualified = qualified.len(),
        tied = tied.len(),
        score = best.score,
        delta = best.delta,
        "Fuzzy scan finished"
    );

    if tied.len() == 1 {
        return MatchResult {
            candidate: Some(best.candidate),
            score: best.score,
            method: Some(MatchMethod::FuzzyTitle),
            ambiguous,
            tied: 1,
            resolved_by_operator: false,
        };
    }

    let choice = resolver
        .and_then(|resolver| resolver.resolve(record, &tied))
        .and_then(|i| tied.get(i));
    match choice {
        Some(chosen) => MatchResult {
            candidate: Some(chosen.candidate),
            score: chosen.score,
            method: Some(MatchMethod::FuzzyTitle),
            ambiguous,
            tied: tied.len(),
            resolved_by_operator: true,
        },
        None => MatchResult {
            candidate: None,
            score: best.score,
            method: None,
            ambiguous,
            tied: tied.len(),
            resolved_by_operator: false,
        },
    }
}

/// Highest score first, then smallest delta.
fn rank(a: &ScoredCandidate<'_>, b: &ScoredCandidate<'_>) -> Ordering {
    b.score.total_cmp(&a.score).then(a.delta.cmp(&b.delta))
}

/// Candidates inside the tolerance window paired with their distance.
///
/// A record without a reference value on the axis is compared against the
/// whole index at distance zero.
fn scan_window<'a>(
    record: &AuthoritativeRecord,
    index: &'a CandidateIndex,
    config: &MatchConfig,
) -> Box<dyn Iterator<Item = (&'a IndexedCandidate, u32)> + 'a> {
    let tolerance = config.tolerance;
    match config.tolerance_axis {
        ToleranceAxis::Volume => match record.volume {
            Some(volume) => Box::new(
                index
                    .iter_candidates(volume.saturating_sub(tolerance)..=volume.saturating_add(tolerance))
                    .map(move |entry| (entry, entry.record().volume.map_or(u32::MAX, |v| v.abs_diff(volume)))),
            ),
            None => Box::new(index.iter_all().map(|entry| (entry, 0))),
        },
        ToleranceAxis::Year => match record.year {
            Some(year) => {
                let span = i32::try_from(tolerance).unwrap_or(i32::MAX);
                Box::new(
                    index
                        .iter_candidates_by_year(year.saturating_sub(span)..=year.saturating_add(span))
                        .map(move |entry| (entry, entry.record().year.map_or(u32::MAX, |y| y.abs_diff(year)))),
                )
            }
            None => Box::new(index.iter_all().map(|entry| (entry, 0))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PageRange;
    use std::cell::Cell;

    fn candidate(id: &str, title: &str, volume: u32, page: u32) -> CandidateRecord {
        let mut record = CandidateRecord::new(id, title);
        record.volume = Some(volume);
        record.pages = Some(PageRange::new(page, None));
        record
    }

    fn record(title: &str, volume: u32, page: u32) -> AuthoritativeRecord {
        AuthoritativeRecord::new("100", title)
            .with_volume(volume)
            .with_pages(PageRange::new(page, None))
    }

    #[test]
    fn test_fuzzy_match_succeeds_above_threshold() {
        let index = CandidateIndex::build(vec![candidate("c1", "STRUCTURE OF HYPERNUCLEI.", 45, 999)]);
        let config = MatchConfig::default()
            .with_strategy(MatchStrategy::FuzzyOnly)
            .with_fuzzy_threshold(0.8);
        let result = match_record(&record("Structure of Hypernuclei", 45, 1), &index, &config, None);
        assert_eq!(result.candidate.map(|c| c.source_id.as_str()), Some("c1"));
        assert_eq!(result.method, Some(MatchMethod::FuzzyTitle));
        assert!(result.score >= 0.8);
        assert!(!result.ambiguous);
    }

    #[test]
    fn test_fuzzy_match_fails_below_threshold() {
        let index = CandidateIndex::build(vec![candidate("c1", "Measurement of Neutrino Oscillation", 45, 1)]);
        let config = MatchConfig::default().with_strategy(MatchStrategy::FuzzyOnly);
        let result = match_record(&record("Study of Quark Gluon Plasma", 45, 1), &index, &config, None);
        assert!(!result.is_match());
        assert_eq!(result.tied, 0);
    }

    #[test]
    fn test_exact_key_takes_precedence() {
        let index = CandidateIndex::build(vec![
            candidate("fuzzy", "Structure of Hypernuclei", 45, 500),
            candidate("keyed", "Completely Different Words", 45, 100),
        ]);
        let config = MatchConfig::default();
        let result = match_record(&record("Structure of Hypernuclei", 45, 100), &index, &config, None);
        assert_eq!(result.candidate.map(|c| c.source_id.as_str()), Some("keyed"));
        assert_eq!(result.method, Some(MatchMethod::ExactKey));
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_key_hit_with_failed_confirmation_falls_back_to_fuzzy() {
        let index = CandidateIndex::build(vec![
            candidate("fuzzy", "Structure of Hypernuclei", 45, 500),
            candidate("miskeyed", "Completely Different Words", 45, 100),
        ]);
        let config = MatchConfig::default().with_confirm_key_threshold(0.6);
        let result = match_record(&record("Structure of Hypernuclei", 45, 100), &index, &config, None);
        assert_eq!(result.candidate.map(|c| c.source_id.as_str()), Some("fuzzy"));
        assert_eq!(result.method, Some(MatchMethod::FuzzyTitle));

        let strict = config.with_strategy(MatchStrategy::StrictKey);
        let result = match_record(&record("Structure of Hypernuclei", 45, 100), &index, &strict, None);
        assert!(!result.is_match());
    }

    #[test]
    fn test_strict_key_never_scans() {
        let index = CandidateIndex::build(vec![candidate("c1", "Structure of Hypernuclei", 45, 500)]);
        let config = MatchConfig::default().with_strategy(MatchStrategy::StrictKey);
        let result = match_record(&record("Structure of Hypernuclei", 45, 100), &index, &config, None);
        assert!(!result.is_match());
    }

    #[test]
    fn test_volume_tolerance_window() {
        let index = CandidateIndex::build(vec![candidate("far", "Structure of Hypernuclei", 48, 1)]);
        let config = MatchConfig::default().with_strategy(MatchStrategy::FuzzyOnly);
        let result = match_record(&record("Structure of Hypernuclei", 45, 1), &index, &config, None);
        assert!(!result.is_match());

        let wide = config.with_tolerance(3, ToleranceAxis::Volume);
        let result = match_record(&record("Structure of Hypernuclei", 45, 1), &index, &wide, None);
        assert!(result.is_match());
    }

    #[test]
    fn test_year_axis() {
        let mut near = CandidateRecord::new("near", "Structure of Hypernuclei");
        near.year = Some(2001);
        let index = CandidateIndex::build(vec![near]);
        let config = MatchConfig::default()
            .with_strategy(MatchStrategy::FuzzyOnly)
            .with_tolerance(2, ToleranceAxis::Year);
        let rec = AuthoritativeRecord::new("1", "Structure of Hypernuclei").with_year(2003);
        assert!(match_record(&rec, &index, &config, None).is_match());
        let rec = AuthoritativeRecord::new("1", "Structure of Hypernuclei").with_year(2004);
        assert!(!match_record(&rec, &index, &config, None).is_match());
    }

    #[test]
    fn test_tie_broken_by_higher_score_then_smaller_delta() {
        let index = CandidateIndex::build(vec![
            candidate("weaker", "Structure of Hypernuclei II", 45, 1),
            candidate("farther", "Structure of Hypernuclei", 47, 1),
            candidate("closer", "Structure of Hypernuclei", 46, 1),
        ]);
        let config = MatchConfig::default().with_strategy(MatchStrategy::FuzzyOnly);
        let result = match_record(&record("Structure of Hypernuclei", 45, 9), &index, &config, None);
        assert_eq!(result.candidate.map(|c| c.source_id.as_str()), Some("closer"));
        assert!(result.ambiguous);
        assert_eq!(result.tied, 1);
    }

    #[test]
    fn test_unbreakable_tie_is_no_match_without_resolver() {
        let index = CandidateIndex::build(vec![
            candidate("a", "Structure of Hypernuclei", 46, 1),
            candidate("b", "Structure of Hypernuclei", 44, 2),
        ]);
        let config = MatchConfig::default().with_strategy(MatchStrategy::FuzzyOnly);
        let rec = record("Structure of Hypernuclei", 45, 9);

        let result = match_record(&rec, &index, &config, None);
        assert!(result.is_unresolved_tie());
        assert_eq!(result.tied, 2);

        let result = match_record(&rec, &index, &config, Some(&SkipAmbiguous));
        assert!(result.is_unresolved_tie());
    }

    struct PickSecond {
        calls: Cell<usize>,
    }

    impl AmbiguityResolver for PickSecond {
        fn resolve(&self, _record: &AuthoritativeRecord, tied: &[ScoredCandidate<'_>]) -> Option<usize> {
            self.calls.set(self.calls.get() + 1);
            assert_eq!(tied.len(), 2);
            Some(1)
        }

        fn is_interactive(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_resolver_picks_among_tied() {
        let index = CandidateIndex::build(vec![
            candidate("a", "Structure of Hypernuclei", 46, 1),
            candidate("b", "Structure of Hypernuclei", 44, 2),
        ]);
        let config = MatchConfig::default().with_strategy(MatchStrategy::FuzzyOnly);
        let resolver = PickSecond { calls: Cell::new(0) };
        let result = match_record(&record("Structure of Hypernuclei", 45, 9), &index, &config, Some(&resolver));
        // volume 44 comes first in the window
        assert_eq!(result.candidate.map(|c| c.source_id.as_str()), Some("a"));
        assert!(result.resolved_by_operator);
        assert_eq!(resolver.calls.get(), 1);
    }

    #[test]
    fn test_matching_is_deterministic() {
        let index = CandidateIndex::build(vec![
            candidate("a", "Lambda hypernuclei in emulsion", 45, 1),
            candidate("b", "Hypernuclei in emulsion", 45, 2),
            candidate("c", "Emulsion studies", 46, 3),
        ]);
        let config = MatchConfig::default().with_strategy(MatchStrategy::FuzzyOnly);
        let rec = record("Λ hypernuclei in emulsion", 45, 9);
        let first = match_record(&rec, &index, &config, None);
        for _ in 0..5 {
            let again = match_record(&rec, &index, &config, None);
            assert_eq!(
                again.candidate.map(|c| &c.source_id),
                first.candidate.map(|c| &c.source_id)
            );
            assert_eq!(again.score, first.score);
        }
    }

    #[test]
    fn test_threshold_is_clamped() {
        let config = MatchConfig::default().with_fuzzy_threshold(1.7);
        assert_eq!(config.fuzzy_threshold, 1.0);
        let config = config.with_confirm_key_threshold(-3.0);
        assert_eq!(config.confirm_key_threshold, Some(0.0));
    }
}
