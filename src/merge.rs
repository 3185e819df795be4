//! Field merge and validation.
//!
//! Combines an authoritative record with its matched candidate under one
//! run-wide [`MergeMode`]:
//!
//! - **append-only** adds what the catalogue lacks (abstract, fulltext file,
//!   free keywords) and never touches a value that is already there.
//! - **correct** rewrites selected publication-info parts (773) from the
//!   candidate. Each part is validated on its own; a rejected part keeps the
//!   catalogue value while the other parts still apply.

use crate::error::ReconError;
use crate::model::{parse_volume, parse_year, AuthoritativeRecord, CandidateRecord, PageRange, Subfield};
use crate::normalize::tidy_abstract;
use crate::schema::{Field, MergeMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Part of the publication-info field that `correct` mode may rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PubInfoPart {
    Volume,
    Year,
    Issue,
    PageRange,
}

impl PubInfoPart {
    /// 773 subfield code.
    pub fn code(self) -> char {
        match self {
            PubInfoPart::Volume => 'v',
            PubInfoPart::Year => 'y',
            PubInfoPart::Issue => 'n',
            PubInfoPart::PageRange => 'c',
        }
    }
}

impl fmt::Display for PubInfoPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PubInfoPart::Volume => f.write_str("volume"),
            PubInfoPart::Year => f.write_str("year"),
            PubInfoPart::Issue => f.write_str("issue"),
            PubInfoPart::PageRange => f.write_str("page_range"),
        }
    }
}

/// Merge configuration, fixed for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub mode: MergeMode,
    /// Parts `correct` mode rewrites
    pub correct_parts: Vec<PubInfoPart>,
    /// Largest allowed move of the first page
    pub max_page_shift: u32,
    pub max_volume_shift: u32,
    pub max_year_shift: u32,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            mode: MergeMode::AppendOnly,
            correct_parts: vec![PubInfoPart::Issue, PubInfoPart::PageRange],
            max_page_shift: 5000,
            max_volume_shift: 2,
            max_year_shift: 2,
        }
    }
}

impl MergeConfig {
    pub fn correct(parts: Vec<PubInfoPart>) -> Self {
        Self {
            mode: MergeMode::Correct,
            correct_parts: parts,
            ..Default::default()
        }
    }
}

/// A merged value and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    pub subfields: Vec<Subfield>,
    /// Source name
    pub provenance: String,
}

impl FieldValue {
    pub fn new(subfields: Vec<Subfield>, provenance: impl Into<String>) -> Self {
        Self {
            subfields,
            provenance: provenance.into(),
        }
    }
}

/// A publication-info part that was rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub part: PubInfoPart,
    pub old: Option<String>,
    pub new: String,
}

/// A candidate value refused by validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRejection {
    /// Field or publication-info part
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl FieldRejection {
    fn new(field: impl fmt::Display, value: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn to_error(&self, recid: &str) -> ReconError {
        ReconError::FieldValidationFailure {
            recid: recid.to_string(),
            field: self.field.clone(),
            reason: format!("{} ({:?})", self.reason, self.value),
        }
    }
}

/// Fields to write for one record, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub recid: String,
    fields: Vec<(Field, Vec<FieldValue>)>,
    pub corrections: Vec<Correction>,
    pub rejected: Vec<FieldRejection>,
}

impl MergedRecord {
    pub fn new(recid: impl Into<String>) -> Self {
        Self {
            recid: recid.into(),
            ..Default::default()
        }
    }

    /// Append a value to `field`.
    pub fn insert(&mut self, field: Field, value: FieldValue) {
        match self.fields.iter_mut().find(|(f, _)| *f == field) {
            Some((_, values)) => values.push(value),
            None => self.fields.push((field, vec![value])),
        }
    }

    pub fn get(&self, field: Field) -> Option<&[FieldValue]> {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, values)| values.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &[FieldValue])> {
        self.fields.iter().map(|(f, values)| (*f, values.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Field to subfield map with whitespace collapsed and provenance dropped.
    pub fn value_map(&self) -> BTreeMap<Field, Vec<Vec<(char, String)>>> {
        self.fields
            .iter()
            .map(|(field, values)| {
                let values: Vec<Vec<(char, String)>> = values
                    .iter()
                    .map(|value| {
                        value
                            .subfields
                            .iter()
                            .map(|s| (s.code, s.value.split_whitespace().collect::<Vec<_>>().join(" ")))
                            .collect()
                    })
                    .collect();
                (*field, values)
            })
            .collect()
    }
}

/// Merge `candidate` into `record`.
pub fn merge(
    record: &AuthoritativeRecord,
    candidate: &CandidateRecord,
    source: &str,
    config: &MergeConfig,
) -> MergedRecord {
    let mut merged = MergedRecord::new(&record.recid);
    match config.mode {
        MergeMode::AppendOnly => append_missing(record, candidate, source, &mut merged),
        MergeMode::Correct => correct_publication_info(record, candidate, source, config, &mut merged),
    }

    for rejection in &merged.rejected {
        warn!(
            recid = %record.recid,
            stage = "merge",
            field = %rejection.field,
            value = %rejection.value,
            reason = %rejection.reason,
            "Field validation failure"
        );
    }
    debug!(
        recid = %record.recid,
        mode = %config.mode,
        fields = merged.len(),
        corrections = merged.corrections.len(),
        "Merged record"
    );
    merged
}

fn append_missing(
    record: &AuthoritativeRecord,
    candidate: &CandidateRecord,
    source: &str,
    merged: &mut MergedRecord,
) {
    if !record.has_field(Field::Abstract) {
        if let Some(text) = candidate.abstract_text.as_deref() {
            let text = tidy_abstract(text);
            if text.is_empty() {
                merged.rejected.push(FieldRejection::new(Field::Abstract, "", "empty abstract"));
            } else {
                merged.insert(Field::Abstract, FieldValue::new(vec![Subfield::new('a', text)], source));
            }
        }
    }

    if !record.has_field(Field::FulltextFile) {
        if let Some(fulltext) = &candidate.fulltext {
            if fulltext.location.trim().is_empty() {
                merged
                    .rejected
                    .push(FieldRejection::new(Field::FulltextFile, "", "empty fulltext location"));
            } else {
                let mut subfields = vec![Subfield::new('a', fulltext.location.trim())];
                if !fulltext.description.is_empty() {
                    subfields.push(Subfield::new('d', &fulltext.description));
                }
                if !fulltext.access.is_empty() {
                    subfields.push(Subfield::new('t', &fulltext.access));
                }
                merged.insert(Field::FulltextFile, FieldValue::new(subfields, source));
            }
        }
    }

    if !record.has_field(Field::FreeKeyword) {
        for keyword in candidate.keywords.iter().map(|k| k.trim()).filter(|k| !k.is_empty()) {
            merged.insert(Field::FreeKeyword, FieldValue::new(vec![Subfield::new('a', keyword)], source));
        }
    }
}

fn correct_publication_info(
    record: &AuthoritativeRecord,
    candidate: &CandidateRecord,
    source: &str,
    config: &MergeConfig,
    merged: &mut MergedRecord,
) {
    let Some(existing) = record.first_instance(Field::PublicationInfo) else {
        warn!(
            recid = %record.recid,
            stage = "merge",
            "No publication info to correct"
        );
        return;
    };
    let mut subfields = existing.to_vec();

    for &part in &config.correct_parts {
        let Some(proposed) = candidate_value(part, record, candidate, config, &mut merged.rejected) else {
            continue;
        };

        let code = part.code();
        let existing = subfields.iter_mut().find(|s| s.code == code);
        let old = existing.as_ref().map(|s| s.value.clone());
        if old.as_deref().is_some_and(|old| same_value(part, old, &proposed)) {
            continue;
        }
        let proposed = match (part, old.as_deref()) {
            (PubInfoPart::Volume, Some(old)) => format!("{}{proposed}", series_prefix(old)),
            _ => proposed,
        };
        match existing {
            Some(subfield) => subfield.value = proposed.clone(),
            None => subfields.push(Subfield::new(code, proposed.clone())),
        }
        merged.corrections.push(Correction {
            part,
            old,
            new: proposed,
        });
    }

    if !merged.corrections.is_empty() {
        subfields.sort_by_key(|s| s.code);
        merged.insert(Field::PublicationInfo, FieldValue::new(subfields, source));
    }
}

/// Whether `old` and `new` denote the same value of `part`.
///
/// `B45` and `45`, `034501` and `34501`, `05` and `5` are all equal.
fn same_value(part: PubInfoPart, old: &str, new: &str) -> bool {
    if old.trim() == new {
        return true;
    }
    match part {
        PubInfoPart::Volume => parse_volume(old).is_some() && parse_volume(old) == parse_volume(new),
        PubInfoPart::Year => parse_year(old).is_some() && parse_year(old) == parse_year(new),
        PubInfoPart::Issue => {
            let old = old.trim().trim_start_matches('0');
            !old.is_empty() && old.eq_ignore_ascii_case(new)
        }
        PubInfoPart::PageRange => PageRange::parse(old).is_some() && PageRange::parse(old) == PageRange::parse(new),
    }
}

/// Letters before the volume number, e.g. `B` in `B45`.
fn series_prefix(volume: &str) -> &str {
    let volume = volume.trim();
    let end = volume.find(|c: char| c.is_ascii_digit()).unwrap_or(volume.len());
    &volume[..end]
}

/// Validated value the candidate proposes for `part`, if any.
fn candidate_value(
    part: PubInfoPart,
    record: &AuthoritativeRecord,
    candidate: &CandidateRecord,
    config: &MergeConfig,
    rejected: &mut Vec<FieldRejection>,
) -> Option<String> {
    let outcome = match part {
        PubInfoPart::Volume => {
            let reported = record.subfield(Field::PublicationInfo, 'v').and_then(parse_volume).or(record.volume);
            candidate
                .volume
                .map(|volume| validate_volume(volume, reported, config.max_volume_shift))
        }
        PubInfoPart::Year => {
            let reported = record.subfield(Field::PublicationInfo, 'y').and_then(parse_year).or(record.year);
            candidate
                .year
                .map(|year| validate_year(year, reported, config.max_year_shift))
        }
        PubInfoPart::Issue => candidate.issue.as_deref().map(validate_issue),
        PubInfoPart::PageRange => {
            let reported = record
                .subfield(Field::PublicationInfo, 'c')
                .and_then(PageRange::parse)
                .or(record.page_range);
            candidate
                .pages
                .map(|pages| validate_pages(pages, reported, config.max_page_shift))
        }
    };

    match outcome {
        None => {
            debug!(recid = %record.recid, %part, "Candidate has no value");
            None
        }
        Some(Ok(value)) => Some(value),
        Some(Err(rejection)) => {
            rejected.push(FieldRejection { field: part.to_string(), ..rejection });
            None
        }
    }
}

fn validate_volume(volume: u32, reported: Option<u32>, max_shift: u32) -> Result<String, FieldRejection> {
    if volume == 0 {
        return Err(FieldRejection::new("", volume, "volume must be positive"));
    }
    if let Some(reported) = reported {
        if volume.abs_diff(reported) > max_shift {
            return Err(FieldRejection::new(
                "",
                volume,
                format!("volume differs from reported {reported} by more than {max_shift}"),
            ));
        }
    }
    Ok(volume.to_string())
}

fn validate_year(year: i32, reported: Option<i32>, max_shift: u32) -> Result<String, FieldRejection> {
    if !(1000..=9999).contains(&year) {
        return Err(FieldRejection::new("", year, "year is not a four-digit year"));
    }
    if let Some(reported) = reported {
        if year.abs_diff(reported) > max_shift {
            return Err(FieldRejection::new(
                "",
                year,
                format!("year differs from reported {reported} by more than {max_shift}"),
            ));
        }
    }
    Ok(year.to_string())
}

fn validate_issue(issue: &str) -> Result<String, FieldRejection> {
    let issue = issue.trim();
    if issue.is_empty() || !issue.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(FieldRejection::new("", issue, "issue must be alphanumeric"));
    }
    // "03" and "3" are the same issue
    let trimmed = issue.trim_start_matches('0');
    if trimmed.is_empty() {
        return Err(FieldRejection::new("", issue, "issue must be positive"));
    }
    Ok(trimmed.to_string())
}

fn validate_pages(mut pages: PageRange, reported: Option<PageRange>, max_shift: u32) -> Result<String, FieldRejection> {
    if pages.start == 0 {
        return Err(FieldRejection::new("", pages, "first page must be positive"));
    }
    if let Some(end) = pages.end {
        if end < pages.start {
            return Err(FieldRejection::new("", pages, "last page precedes first page"));
        }
    }
    if let Some(reported) = reported {
        if pages.start.abs_diff(reported.start) > max_shift {
            return Err(FieldRejection::new(
                "",
                pages,
                format!("first page moves more than {max_shift} from reported {}", reported.start),
            ));
        }
        // same first page without a last page keeps the reported range
        if pages.end.is_none() && pages.start == reported.start {
            pages.end = reported.end;
        }
    }
    Ok(pages.to_string())
}
