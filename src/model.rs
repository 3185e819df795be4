//! Record types shared by the matcher, merge and emitter stages.

use crate::schema::Field;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One `(code, value)` pair inside a MARC datafield.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subfield {
    pub code: char,
    pub value: String,
}

impl Subfield {
    pub fn new(code: char, value: impl Into<String>) -> Self {
        Self {
            code,
            value: value.into(),
        }
    }
}

/// Page range as printed in a citation, `1234-1240` or just `1234`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: Option<u32>,
}

impl PageRange {
    pub fn new(start: u32, end: Option<u32>) -> Self {
        Self { start, end }
    }

    /// Parse a page string.
    ///
    /// Only the digits of each side count, so article prefixes and letter
    /// suffixes (`L123`, `123e`) reduce to the page number. Returns `None`
    /// when the first page has no digits.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.splitn(2, '-');
        let start = digits_of(parts.next()?)?;
        let end = parts.next().and_then(digits_of);
        Some(Self { start, end })
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}-{}", self.start, end),
            None => write!(f, "{}", self.start),
        }
    }
}

fn digits_of(text: &str) -> Option<u32> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Parse a journal volume such as `45` or `B45` (series letter plus number).
///
/// The first run of digits is the volume.
pub fn parse_volume(text: &str) -> Option<u32> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Parse a four-digit publication year out of `2004` or `2004-05-12`.
pub fn parse_year(text: &str) -> Option<i32> {
    let digits: String = text
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    if digits.len() == 4 {
        digits.parse().ok()
    } else {
        None
    }
}

/// A record from the catalogue being enriched.
///
/// Built once by the reader and never mutated by the reconciler.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthoritativeRecord {
    pub recid: String,
    pub title: String,
    pub volume: Option<u32>,
    pub year: Option<i32>,
    pub page_range: Option<PageRange>,
    /// Field instances the catalogue already carries
    pub fields: BTreeMap<Field, Vec<Vec<Subfield>>>,
}

impl AuthoritativeRecord {
    pub fn new(recid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            recid: recid.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_volume(mut self, volume: u32) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_pages(mut self, pages: PageRange) -> Self {
        self.page_range = Some(pages);
        self
    }

    /// Add one instance of `field`.
    pub fn with_field(mut self, field: Field, subfields: Vec<Subfield>) -> Self {
        self.fields.entry(field).or_default().push(subfields);
        self
    }

    /// Build from already-parsed field instances.
    ///
    /// Title comes from 245 `$a`; volume, year and pages from 773 `$v $y $c`.
    pub fn from_fields(recid: impl Into<String>, fields: BTreeMap<Field, Vec<Vec<Subfield>>>) -> Self {
        let mut record = Self {
            recid: recid.into(),
            fields,
            ..Default::default()
        };
        record.title = record.subfield(Field::Title, 'a').unwrap_or_default().to_string();
        record.volume = record.subfield(Field::PublicationInfo, 'v').and_then(parse_volume);
        record.year = record.subfield(Field::PublicationInfo, 'y').and_then(parse_year);
        record.page_range = record.subfield(Field::PublicationInfo, 'c').and_then(PageRange::parse);
        record
    }

    /// True when some instance of `field` carries a non-blank value.
    pub fn has_field(&self, field: Field) -> bool {
        self.fields.get(&field).is_some_and(|instances| {
            instances
                .iter()
                .flatten()
                .any(|subfield| !subfield.value.trim().is_empty())
        })
    }

    /// First value of subfield `code` in the first instance of `field` that has it.
    pub fn subfield(&self, field: Field, code: char) -> Option<&str> {
        self.fields
            .get(&field)?
            .iter()
            .flatten()
            .find(|subfield| subfield.code == code)
            .map(|subfield| subfield.value.as_str())
    }

    /// First instance of `field`, if any.
    pub fn first_instance(&self, field: Field) -> Option<&[Subfield]> {
        self.fields.get(&field)?.first().map(Vec::as_slice)
    }
}

/// Pointer to a document file to attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulltextRef {
    /// Path or URL
    pub location: String,
    pub description: String,
    /// Access tag, e.g. `INSPIRE-PUBLIC`
    pub access: String,
}

/// A record from a secondary source (publisher export or splash-page crawl).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Identifier in the secondary source
    pub source_id: String,
    pub title: String,
    pub volume: Option<u32>,
    pub year: Option<i32>,
    pub issue: Option<String>,
    pub pages: Option<PageRange>,
    pub abstract_text: Option<String>,
    pub fulltext: Option<FulltextRef>,
    /// Free keywords in source order
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl CandidateRecord {
    pub fn new(source_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn first_page(&self) -> Option<u32> {
        self.pages.map(|pages| pages.start)
    }
}
