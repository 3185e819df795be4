//! Secondary-source loader.
//!
//! Reads a publisher export (CSV or JSON) into [`CandidateRecord`]s through a
//! [`SourceProfile`] that names the columns, or JSON keys, holding each
//! value. Rows that cannot become a candidate are logged and skipped.

use crate::error::{ReconError, Result};
use crate::model::{parse_volume, parse_year, CandidateRecord, FulltextRef, PageRange};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{info, warn};

/// Export file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Csv,
    Json,
}

impl SourceFormat {
    /// Guess from the file extension, CSV unless it says `.json`.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SourceFormat::Json,
            _ => SourceFormat::Csv,
        }
    }
}

/// Where each candidate value lives in the export.
///
/// CSV entries are header names. JSON entries are object keys, or JSON
/// pointers when they start with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub id: Option<String>,
    pub title: Option<String>,
    pub volume: Option<String>,
    pub year: Option<String>,
    pub issue: Option<String>,
    /// Whole page range like `1234-1240`; wins over `page_start`/`page_end`
    pub pages: Option<String>,
    pub page_start: Option<String>,
    pub page_end: Option<String>,
    pub abstract_text: Option<String>,
    pub fulltext: Option<String>,
    /// Free keywords; a JSON array or a `;`-separated string
    pub keywords: Option<String>,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            id: Some("id".to_string()),
            title: Some("title".to_string()),
            volume: Some("volume".to_string()),
            year: Some("year".to_string()),
            issue: Some("issue".to_string()),
            pages: Some("pages".to_string()),
            page_start: Some("page_start".to_string()),
            page_end: Some("page_end".to_string()),
            abstract_text: Some("abstract".to_string()),
            fulltext: Some("fulltext".to_string()),
            keywords: Some("keywords".to_string()),
        }
    }
}

/// How to read one secondary source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceProfile {
    /// Source name, recorded as provenance on merged values
    pub name: String,
    /// Detected from the extension when unset
    pub format: Option<SourceFormat>,
    pub delimiter: char,
    /// JSON pointer to the record array; the document root when unset
    pub records_pointer: Option<String>,
    pub columns: ColumnMap,
    /// Fulltext location built from `{id}`, `{volume}`, `{page}`, `{page4}`
    pub fulltext_template: Option<String>,
    pub fulltext_description: String,
    pub fulltext_access: String,
}

impl Default for SourceProfile {
    fn default() -> Self {
        Self {
            name: "publisher".to_string(),
            format: None,
            delimiter: ',',
            records_pointer: None,
            columns: ColumnMap::default(),
            fulltext_template: None,
            fulltext_description: "Fulltext".to_string(),
            fulltext_access: "INSPIRE-PUBLIC".to_string(),
        }
    }
}

/// Raw values of one export row before parsing.
#[derive(Debug, Default)]
struct RawRow {
    id: Option<String>,
    title: Option<String>,
    volume: Option<String>,
    year: Option<String>,
    issue: Option<String>,
    pages: Option<String>,
    page_start: Option<String>,
    page_end: Option<String>,
    abstract_text: Option<String>,
    fulltext: Option<String>,
    keywords: Option<String>,
}

impl RawRow {
    fn from_lookup(columns: &ColumnMap, mut get: impl FnMut(&str) -> Option<String>) -> Self {
        let mut field = |column: &Option<String>| {
            column
                .as_deref()
                .and_then(&mut get)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            id: field(&columns.id),
            title: field(&columns.title),
            volume: field(&columns.volume),
            year: field(&columns.year),
            issue: field(&columns.issue),
            pages: field(&columns.pages),
            page_start: field(&columns.page_start),
            page_end: field(&columns.page_end),
            abstract_text: field(&columns.abstract_text),
            fulltext: field(&columns.fulltext),
            keywords: field(&columns.keywords),
        }
    }
}

/// Load all candidates from `path`.
pub fn load_candidates(path: &Path, profile: &SourceProfile) -> Result<Vec<CandidateRecord>> {
    let format = profile.format.unwrap_or_else(|| SourceFormat::from_path(path));
    let file = File::open(path)?;
    let candidates = match format {
        SourceFormat::Csv => read_csv(file, profile)?,
        SourceFormat::Json => read_json(BufReader::new(file), profile)?,
    };
    info!(
        source = %profile.name,
        path = %path.display(),
        candidates = candidates.len(),
        "Loaded candidates"
    );
    Ok(candidates)
}

/// Read a CSV export with a header row.
pub fn read_csv<R: Read>(reader: R, profile: &SourceProfile) -> Result<Vec<CandidateRecord>> {
    let delimiter = u8::try_from(profile.delimiter)
        .map_err(|_| ReconError::Config(format!("delimiter {:?} is not ASCII", profile.delimiter)))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(reader);
    let headers = reader.headers()?.clone();

    let mut candidates = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let raw = RawRow::from_lookup(&profile.columns, |column| {
            headers
                .iter()
                .position(|h| h.trim() == column)
                .and_then(|pos| record.get(pos))
                .map(str::to_string)
        });
        push_candidate(&mut candidates, i + 1, raw, profile);
    }
    Ok(candidates)
}

/// Read a JSON export: an array of objects, at the root or at `records_pointer`.
pub fn read_json<R: Read>(reader: R, profile: &SourceProfile) -> Result<Vec<CandidateRecord>> {
    let document: Value = serde_json::from_reader(reader)?;
    let records = match profile.records_pointer.as_deref() {
        Some(pointer) => document.pointer(pointer),
        None => Some(&document),
    }
    .and_then(Value::as_array)
    .ok_or_else(|| ReconError::Config("JSON source does not hold a record array".to_string()))?;

    let mut candidates = Vec::new();
    for (i, item) in records.iter().enumerate() {
        let lookup = |column: &str| {
            if column.starts_with('/') {
                item.pointer(column)
            } else {
                item.get(column)
            }
        };
        let mut raw = RawRow::from_lookup(&profile.columns, |column| lookup(column).and_then(json_scalar));
        raw.keywords = profile
            .columns
            .keywords
            .as_deref()
            .and_then(lookup)
            .and_then(json_list)
            .filter(|v| !v.trim().is_empty());
        push_candidate(&mut candidates, i + 1, raw, profile);
    }
    Ok(candidates)
}

fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => items.first().and_then(json_scalar),
        Value::Object(_) => None,
    }
}

/// Every scalar of an array joined with `;`, or the scalar itself.
fn json_list(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => {
            let joined = items.iter().filter_map(json_scalar).collect::<Vec<_>>().join(";");
            Some(joined)
        }
        other => json_scalar(other),
    }
}

fn split_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for keyword in text.split(';').map(str::trim).filter(|k| !k.is_empty()) {
        if !keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword)) {
            keywords.push(keyword.to_string());
        }
    }
    keywords
}

fn push_candidate(candidates: &mut Vec<CandidateRecord>, row: usize, raw: RawRow, profile: &SourceProfile) {
    match build_candidate(row, raw, profile) {
        Ok(candidate) => candidates.push(candidate),
        Err(e) => warn!(source = %profile.name, row, error = %e, "Skipping source record"),
    }
}

fn build_candidate(row: usize, raw: RawRow, profile: &SourceProfile) -> Result<CandidateRecord> {
    let title = raw.title.ok_or_else(|| ReconError::SourceRecord {
        row,
        message: "missing title".to_string(),
    })?;

    let mut candidate = CandidateRecord::new(raw.id.unwrap_or_else(|| format!("row{row}")), title);
    candidate.volume = raw.volume.as_deref().and_then(parse_volume);
    candidate.year = raw.year.as_deref().and_then(parse_year);
    candidate.issue = raw.issue;
    candidate.pages = match raw.pages.as_deref() {
        Some(pages) => PageRange::parse(pages),
        None => raw
            .page_start
            .as_deref()
            .and_then(PageRange::parse)
            .map(|start| PageRange::new(start.start, raw.page_end.as_deref().and_then(PageRange::parse).map(|end| end.start))),
    };
    candidate.abstract_text = raw.abstract_text;
    candidate.keywords = raw.keywords.as_deref().map(split_keywords).unwrap_or_default();

    let location = raw.fulltext.or_else(|| {
        profile
            .fulltext_template
            .as_deref()
            .and_then(|template| expand_template(template, &candidate))
    });
    candidate.fulltext = location.map(|location| FulltextRef {
        location,
        description: profile.fulltext_description.clone(),
        access: profile.fulltext_access.clone(),
    });

    if raw.volume.is_some() && candidate.volume.is_none() {
        warn!(source = %profile.name, row, id = %candidate.source_id, "Unparseable volume");
    }
    Ok(candidate)
}

/// Fill a fulltext template. `None` if a placeholder has no value.
pub fn expand_template(template: &str, candidate: &CandidateRecord) -> Option<String> {
    let page = candidate.first_page();
    let substitutions = [
        ("{id}", Some(candidate.source_id.clone())),
        ("{volume}", candidate.volume.map(|v| v.to_string())),
        ("{page4}", page.map(|p| format!("{p:04}"))),
        ("{page}", page.map(|p| p.to_string())),
    ];

    let mut out = template.to_string();
    for (placeholder, value) in substitutions {
        if out.contains(placeholder) {
            out = out.replace(placeholder, &value?);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_csv_with_defaults() {
        let data = "id,title,volume,year,pages,abstract\n\
                    a1,Structure of Hypernuclei,B45,2014,1011-1020,An abstract.\n\
                    a2,,45,2014,1,\n\
                    a3,Other title,46,2015,L7,\n";
        let candidates = read_csv(data.as_bytes(), &SourceProfile::default()).expect("valid csv");
        assert_eq!(candidates.len(), 2, "row without title is skipped");

        let first = &candidates[0];
        assert_eq!(first.source_id, "a1");
        assert_eq!(first.volume, Some(45));
        assert_eq!(first.year, Some(2014));
        assert_eq!(first.pages, Some(PageRange::new(1011, Some(1020))));
        assert_eq!(first.abstract_text.as_deref(), Some("An abstract."));
        assert!(first.fulltext.is_none());
        assert_eq!(candidates[1].first_page(), Some(7));
    }

    #[test]
    fn test_read_csv_custom_columns_and_delimiter() {
        let profile = SourceProfile {
            delimiter: ';',
            columns: ColumnMap {
                title: Some("Article Title".to_string()),
                volume: Some("Vol".to_string()),
                pages: None,
                page_start: Some("First".to_string()),
                page_end: Some("Last".to_string()),
                ..ColumnMap::default()
            },
            ..SourceProfile::default()
        };
        let data = "Article Title;Vol;First;Last\nSpin physics;12;100;110\n";
        let candidates = read_csv(data.as_bytes(), &profile).expect("valid csv");
        assert_eq!(candidates[0].source_id, "row1");
        assert_eq!(candidates[0].pages, Some(PageRange::new(100, Some(110))));
    }

    #[test]
    fn test_read_json_with_pointer() {
        let profile = SourceProfile {
            records_pointer: Some("/data".to_string()),
            columns: ColumnMap {
                volume: Some("/citation/volume".to_string()),
                page_start: Some("/citation/first_page".to_string()),
                ..ColumnMap::default()
            },
            fulltext_template: Some("https://journals.example.org/prab/pdf/{id}".to_string()),
            ..SourceProfile::default()
        };
        let json = r#"{"data": [
            {"id": "10.1103/X.1", "title": "Beam dynamics", "citation": {"volume": 3, "first_page": "024001"}, "year": 2000},
            {"id": "10.1103/X.2", "title": null}
        ]}"#;
        let candidates = read_json(json.as_bytes(), &profile).expect("valid json");
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.volume, Some(3));
        assert_eq!(c.first_page(), Some(24001));
        assert_eq!(c.year, Some(2000));
        let fulltext = c.fulltext.as_ref().expect("templated fulltext");
        assert_eq!(fulltext.location, "https://journals.example.org/prab/pdf/10.1103/X.1");
        assert_eq!(fulltext.access, "INSPIRE-PUBLIC");
    }

    #[test]
    fn test_keywords_from_csv_and_json() {
        let data = "id,title,keywords\na1,Spin physics,polarization; Spin ;spin;;proton\n";
        let candidates = read_csv(data.as_bytes(), &SourceProfile::default()).expect("valid csv");
        assert_eq!(candidates[0].keywords, vec!["polarization", "Spin", "proton"]);

        let json = r#"[
            {"id": "1", "title": "Beam dynamics", "keywords": ["optics", "lattice"]},
            {"id": "2", "title": "No keywords", "keywords": []}
        ]"#;
        let candidates = read_json(json.as_bytes(), &SourceProfile::default()).expect("valid json");
        assert_eq!(candidates[0].keywords, vec!["optics", "lattice"]);
        assert!(candidates[1].keywords.is_empty());
    }

    #[test]
    fn test_read_json_requires_array() {
        let err = read_json(r#"{"data": 1}"#.as_bytes(), &SourceProfile::default()).expect_err("no array");
        assert!(matches!(err, ReconError::Config(_)));
    }

    #[test]
    fn test_expand_template() {
        let mut c = CandidateRecord::new("x", "t");
        c.volume = Some(45);
        c.pages = Some(PageRange::new(73, None));
        assert_eq!(
            expand_template("vol{volume}/fulltext/v{volume}p{page4}.pdf", &c).as_deref(),
            Some("vol45/fulltext/v45p0073.pdf")
        );
        assert_eq!(expand_template("p{page}", &c).as_deref(), Some("p73"));

        c.pages = None;
        assert_eq!(expand_template("p{page}", &c), None);
        assert_eq!(expand_template("static.pdf", &c).as_deref(), Some("static.pdf"));
    }

    #[test]
    fn test_load_candidates_detects_format() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("export.json");
        std::fs::write(&path, r#"[{"id": "1", "title": "A title", "volume": "7"}]"#)?;
        let candidates = load_candidates(&path, &SourceProfile::default())?;
        assert_eq!(candidates[0].volume, Some(7));
        Ok(())
    }
}
