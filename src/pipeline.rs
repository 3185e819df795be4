//! Per-record reconciliation pipeline.
//!
//! Each authoritative record moves forward through
//! `NEW -> NORMALIZED -> {MATCHED | UNMATCHED} -> MERGED -> {EMITTED | SKIPPED}`
//! and never revisits a state. Failures end that record only; the batch
//! carries on with the next one and the [`RunSummary`] counts the outcome.

use crate::config::RunConfig;
use crate::emitter::{emit, StructuredUpdate};
use crate::error::ReconError;
use crate::index::CandidateIndex;
use crate::matcher::{match_normalized, AmbiguityResolver, MatchMethod};
use crate::merge::{merge, Correction};
use crate::model::AuthoritativeRecord;
use crate::normalize::normalize_with_report;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Lifecycle state of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    New,
    Normalized,
    Matched,
    Unmatched,
    Merged,
    Emitted,
    Skipped,
}

impl RecordState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordState::Emitted | RecordState::Skipped)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: RecordState) -> bool {
        use RecordState::*;
        matches!(
            (self, next),
            (New, Normalized)
                | (New, Skipped)
                | (Normalized, Matched)
                | (Normalized, Unmatched)
                | (Matched, Merged)
                | (Unmatched, Skipped)
                | (Merged, Emitted)
                | (Merged, Skipped)
        )
    }

    fn name(self) -> &'static str {
        match self {
            RecordState::New => "NEW",
            RecordState::Normalized => "NORMALIZED",
            RecordState::Matched => "MATCHED",
            RecordState::Unmatched => "UNMATCHED",
            RecordState::Merged => "MERGED",
            RecordState::Emitted => "EMITTED",
            RecordState::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Forward-only state trail of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lifecycle {
    trail: Vec<RecordState>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            trail: vec![RecordState::New],
        }
    }

    pub fn current(&self) -> RecordState {
        self.trail.last().copied().unwrap_or(RecordState::New)
    }

    pub fn trail(&self) -> &[RecordState] {
        &self.trail
    }

    fn advance(&mut self, next: RecordState) {
        let current = self.current();
        debug_assert!(current.can_advance_to(next), "illegal transition {current} -> {next}");
        if current.can_advance_to(next) {
            self.trail.push(next);
        }
    }
}

/// Why a record produced no update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum SkipReason {
    /// Excluded by the run's filter
    OutOfScope { reason: String },
    NoMatchFound,
    AmbiguousMatch { tied: usize, score: f64 },
    /// Matched, but the merge added nothing
    NothingToMerge,
    SchemaEncodingError { tag: String, reason: String },
}

impl SkipReason {
    /// Category label used in logs and the run summary.
    pub fn category(&self) -> &'static str {
        match self {
            SkipReason::OutOfScope { .. } => "out_of_scope",
            SkipReason::NoMatchFound => "no_match_found",
            SkipReason::AmbiguousMatch { .. } => "ambiguous_match",
            SkipReason::NothingToMerge => "nothing_to_merge",
            SkipReason::SchemaEncodingError { .. } => "schema_encoding_error",
        }
    }

    /// The reason as an error value, for callers that want a `Result`.
    pub fn to_error(&self, recid: &str) -> Option<ReconError> {
        let recid = recid.to_string();
        match self {
            SkipReason::NoMatchFound => Some(ReconError::NoMatchFound { recid }),
            SkipReason::AmbiguousMatch { tied, score } => Some(ReconError::AmbiguousMatch {
                recid,
                tied: *tied,
                score: *score,
            }),
            SkipReason::SchemaEncodingError { tag, reason } => Some(ReconError::SchemaEncodingError {
                recid,
                tag: tag.clone(),
                reason: reason.clone(),
            }),
            SkipReason::OutOfScope { .. } | SkipReason::NothingToMerge => None,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::OutOfScope { reason } => write!(f, "out of scope: {reason}"),
            SkipReason::NoMatchFound => f.write_str("no candidate met the threshold"),
            SkipReason::AmbiguousMatch { tied, score } => {
                write!(f, "{tied} candidates tied at similarity {score:.3}")
            }
            SkipReason::NothingToMerge => f.write_str("matched candidate adds nothing"),
            SkipReason::SchemaEncodingError { tag, reason } => write!(f, "cannot encode {tag}: {reason}"),
        }
    }
}

/// Terminal outcome of one record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Emitted(StructuredUpdate),
    Skipped {
        /// State the record was in when it was dropped
        stage: RecordState,
        reason: SkipReason,
    },
}

/// Everything the pipeline learned about one record.
#[derive(Debug, Clone)]
pub struct RecordReport {
    pub recid: String,
    pub outcome: RecordOutcome,
    pub lifecycle: Lifecycle,
    /// Matched candidate's source identifier
    pub candidate: Option<String>,
    pub method: Option<MatchMethod>,
    pub score: Option<f64>,
    /// The candidate was picked by an operator
    pub operator_resolved: bool,
    pub corrections: Vec<Correction>,
    /// Merge fields refused by validation
    pub field_failures: usize,
    /// Code points the normalizer had no entry for
    pub unmapped: Vec<char>,
}

impl RecordReport {
    fn new(recid: &str) -> Self {
        Self {
            recid: recid.to_string(),
            outcome: RecordOutcome::Skipped {
                stage: RecordState::New,
                reason: SkipReason::NoMatchFound,
            },
            lifecycle: Lifecycle::new(),
            candidate: None,
            method: None,
            score: None,
            operator_resolved: false,
            corrections: Vec::new(),
            field_failures: 0,
            unmapped: Vec::new(),
        }
    }

    pub fn update(&self) -> Option<&StructuredUpdate> {
        match &self.outcome {
            RecordOutcome::Emitted(update) => Some(update),
            RecordOutcome::Skipped { .. } => None,
        }
    }

    fn skip(mut self, reason: SkipReason) -> Self {
        let stage = self.lifecycle.current();
        warn!(
            recid = %self.recid,
            stage = %stage,
            category = reason.category(),
            reason = %reason,
            "Record skipped"
        );
        self.lifecycle.advance(RecordState::Skipped);
        self.outcome = RecordOutcome::Skipped { stage, reason };
        self
    }
}

/// Counts over a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub emitted: usize,
    pub skipped: usize,
    pub skipped_by_category: BTreeMap<&'static str, usize>,
    pub exact_key_matches: usize,
    pub fuzzy_matches: usize,
    pub operator_resolved: usize,
    pub corrections: usize,
    pub field_validation_failures: usize,
    pub normalization_warnings: usize,
}

impl RunSummary {
    pub fn record(&mut self, report: &RecordReport) {
        self.processed += 1;
        match &report.outcome {
            RecordOutcome::Emitted(_) => {
                self.emitted += 1;
                if report.operator_resolved {
                    self.operator_resolved += 1;
                }
            }
            RecordOutcome::Skipped { reason, .. } => {
                self.skipped += 1;
                *self.skipped_by_category.entry(reason.category()).or_default() += 1;
            }
        }
        match report.method {
            Some(MatchMethod::ExactKey) => self.exact_key_matches += 1,
            Some(MatchMethod::FuzzyTitle) => self.fuzzy_matches += 1,
            None => {}
        }
        self.corrections += report.corrections.len();
        self.field_validation_failures += report.field_failures;
        if !report.unmapped.is_empty() {
            self.normalization_warnings += 1;
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Processed: {}", self.processed)?;
        writeln!(
            f,
            "Emitted:   {} (exact-key {}, fuzzy-title {}, operator {})",
            self.emitted, self.exact_key_matches, self.fuzzy_matches, self.operator_resolved
        )?;
        writeln!(f, "Skipped:   {}", self.skipped)?;
        for (category, count) in &self.skipped_by_category {
            writeln!(f, "  {category}: {count}")?;
        }
        writeln!(f, "Corrections applied:        {}", self.corrections)?;
        writeln!(f, "Field validation failures:  {}", self.field_validation_failures)?;
        write!(f, "Normalization warnings:     {}", self.normalization_warnings)
    }
}

/// Runs records through normalize, match, merge and emit against one index.
///
/// Holds only shared references, so one reconciler can serve several threads
/// when its resolver allows it.
pub struct Reconciler<'a> {
    index: &'a CandidateIndex,
    config: &'a RunConfig,
    resolver: Option<&'a dyn AmbiguityResolver>,
}

impl<'a> Reconciler<'a> {
    pub fn new(index: &'a CandidateIndex, config: &'a RunConfig) -> Self {
        Self {
            index,
            config,
            resolver: None,
        }
    }

    /// Attach an ambiguity resolver.
    ///
    /// It is consulted only when the config is interactive and the resolver
    /// reports an attached operator; otherwise ties are skipped.
    pub fn with_resolver(mut self, resolver: &'a dyn AmbiguityResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn active_resolver(&self) -> Option<&'a dyn AmbiguityResolver> {
        if !self.config.interactive {
            return None;
        }
        self.resolver.filter(|resolver| resolver.is_interactive())
    }

    /// Reconcile one record.
    pub fn process(&self, record: &AuthoritativeRecord) -> RecordReport {
        let mut report = RecordReport::new(&record.recid);

        if let (Some(max_year), Some(year)) = (self.config.filter.max_year, record.year) {
            if year >= max_year {
                return report.skip(SkipReason::OutOfScope {
                    reason: format!("published {year}, cut-off {max_year}"),
                });
            }
        }

        let normalized = normalize_with_report(&record.title);
        if !normalized.is_clean() {
            warn!(
                recid = %record.recid,
                stage = "normalize",
                unmapped = ?normalized.unmapped,
                "Normalization warning: unmapped code points"
            );
        }
        report.unmapped = normalized.unmapped;
        report.lifecycle.advance(RecordState::Normalized);

        let result = match_normalized(
            record,
            &normalized.text,
            self.index,
            &self.config.matching,
            self.active_resolver(),
        );
        let Some(candidate) = result.candidate else {
            report.lifecycle.advance(RecordState::Unmatched);
            let reason = if result.is_unresolved_tie() {
                SkipReason::AmbiguousMatch {
                    tied: result.tied,
                    score: result.score,
                }
            } else {
                SkipReason::NoMatchFound
            };
            return report.skip(reason);
        };
        report.lifecycle.advance(RecordState::Matched);
        report.candidate = Some(candidate.source_id.clone());
        report.method = result.method;
        report.score = Some(result.score);
        report.operator_resolved = result.resolved_by_operator;
        debug!(
            recid = %record.recid,
            candidate = %candidate.source_id,
            method = ?result.method,
            score = result.score,
            ambiguous = result.ambiguous,
            operator = result.resolved_by_operator,
            "Matched"
        );

        let merged = merge(record, candidate, &self.config.source.name, &self.config.merge);
        report.lifecycle.advance(RecordState::Merged);
        report.field_failures = merged.rejected.len();
        report.corrections = merged.corrections.clone();
        if merged.is_empty() {
            return report.skip(SkipReason::NothingToMerge);
        }

        match emit(&merged) {
            Ok(update) => {
                report.lifecycle.advance(RecordState::Emitted);
                info!(
                    recid = %record.recid,
                    candidate = %candidate.source_id,
                    blocks = update.blocks.len(),
                    "Record emitted"
                );
                report.outcome = RecordOutcome::Emitted(update);
                report
            }
            Err(ReconError::SchemaEncodingError { tag, reason, .. }) => {
                report.skip(SkipReason::SchemaEncodingError { tag, reason })
            }
            Err(other) => report.skip(SkipReason::SchemaEncodingError {
                tag: String::new(),
                reason: other.to_string(),
            }),
        }
    }

    /// Reconcile a batch. Returns the emitted updates in input order.
    pub fn run<'r>(
        &self,
        records: impl IntoIterator<Item = &'r AuthoritativeRecord>,
    ) -> (Vec<StructuredUpdate>, RunSummary) {
        let mut summary = RunSummary::default();
        let mut updates = Vec::new();

        for record in records {
            let report = self.process(record);
            summary.record(&report);
            if let RecordOutcome::Emitted(update) = report.outcome {
                updates.push(update);
            }
        }

        info!(
            processed = summary.processed,
            emitted = summary.emitted,
            skipped = summary.skipped,
            field_validation_failures = summary.field_validation_failures,
            "Run finished"
        );
        (updates, summary)
    }
}
