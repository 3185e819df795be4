//! Fixed output schema.
//!
//! Every logical field the reconciler can write maps onto exactly one MARC
//! tag with fixed indicators. Downstream loaders rely on this table, so the
//! order of [`SCHEMA`] is the canonical emission order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical bibliographic field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    ReportNumber,
    Language,
    Author,
    TranslatedTitle,
    Title,
    PublicationDate,
    PageCount,
    PublicNote,
    Abstract,
    Classification,
    FreeKeyword,
    ControlledKeyword,
    OtherAuthor,
    PublicationInfo,
    FulltextFile,
    Collection,
}

impl Field {
    /// snake_case name used in logs and config.
    pub fn name(self) -> &'static str {
        match self {
            Field::ReportNumber => "report_number",
            Field::Language => "language",
            Field::Author => "author",
            Field::TranslatedTitle => "translated_title",
            Field::Title => "title",
            Field::PublicationDate => "publication_date",
            Field::PageCount => "page_count",
            Field::PublicNote => "public_note",
            Field::Abstract => "abstract",
            Field::Classification => "classification",
            Field::FreeKeyword => "free_keyword",
            Field::ControlledKeyword => "controlled_keyword",
            Field::OtherAuthor => "other_author",
            Field::PublicationInfo => "publication_info",
            Field::FulltextFile => "fulltext_file",
            Field::Collection => "collection",
        }
    }

    /// Schema entry for this field.
    pub fn spec(self) -> &'static FieldSpec {
        // The table holds one entry per variant in declaration order.
        &SCHEMA[self as usize]
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How many values a field may carry in one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Single,
    Repeatable,
}

/// How candidate data may reach the output for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Only fill a field the authoritative record lacks
    #[default]
    AppendOnly,
    /// Overwrite selected authoritative values after validation
    Correct,
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeMode::AppendOnly => f.write_str("append-only"),
            MergeMode::Correct => f.write_str("correct"),
        }
    }
}

/// One row of the schema table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: Field,
    pub tag: &'static str,
    pub ind1: char,
    pub ind2: char,
    /// Subfield holding the field's main value
    pub code: char,
    /// Subfield recording the value's source, if the tag has one
    pub provenance_code: Option<char>,
    pub cardinality: Cardinality,
    /// Strongest merge this field supports; `Correct` fields may also be appended
    pub merge: MergeMode,
}

const fn entry(
    field: Field,
    tag: &'static str,
    indicators: (char, char),
    code: char,
    provenance_code: Option<char>,
    cardinality: Cardinality,
    merge: MergeMode,
) -> FieldSpec {
    FieldSpec {
        field,
        tag,
        ind1: indicators.0,
        ind2: indicators.1,
        code,
        provenance_code,
        cardinality,
        merge,
    }
}

/// The schema, in emission order.
#[rustfmt::skip]
pub static SCHEMA: [FieldSpec; 16] = {
    use Cardinality::{Repeatable, Single};
    use MergeMode::{AppendOnly, Correct};
    [
        entry(Field::ReportNumber, "035", (' ', ' '), 'a', Some('9'), Repeatable, AppendOnly),
        entry(Field::Language, "041", (' ', ' '), 'a', None, Single, AppendOnly),
        entry(Field::Author, "100", (' ', ' '), 'a', None, Single, AppendOnly),
        entry(Field::TranslatedTitle, "242", (' ', ' '), 'a', None, Single, AppendOnly),
        entry(Field::Title, "245", (' ', ' '), 'a', None, Single, AppendOnly),
        entry(Field::PublicationDate, "260", (' ', ' '), 'c', None, Single, AppendOnly),
        entry(Field::PageCount, "300", (' ', ' '), 'a', None, Single, AppendOnly),
        entry(Field::PublicNote, "500", ('1', ' '), 'a', Some('9'), Repeatable, AppendOnly),
        entry(Field::Abstract, "520", (' ', ' '), 'a', Some('9'), Single, AppendOnly),
        entry(Field::Classification, "650", ('1', '7'), 'a', Some('2'), Repeatable, AppendOnly),
        entry(Field::FreeKeyword, "653", ('1', ' '), 'a', Some('9'), Repeatable, AppendOnly),
        entry(Field::ControlledKeyword, "695", (' ', ' '), 'a', Some('2'), Repeatable, AppendOnly),
        entry(Field::OtherAuthor, "700", (' ', ' '), 'a', None, Repeatable, AppendOnly),
        entry(Field::PublicationInfo, "773", (' ', ' '), 'p', None, Single, Correct),
        entry(Field::FulltextFile, "FFT", (' ', ' '), 'a', None, Repeatable, AppendOnly),
        entry(Field::Collection, "980", (' ', ' '), 'a', None, Repeatable, AppendOnly),
    ]
};

/// Field written under `tag`, if the schema knows it.
pub fn field_for_tag(tag: &str) -> Option<Field> {
    SCHEMA.iter().find(|spec| spec.tag == tag).map(|spec| spec.field)
}
