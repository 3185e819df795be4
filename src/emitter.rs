//! Record emitter.
//!
//! Turns a [`MergedRecord`] into the block sequence handed to the writer.
//! Blocks follow [`SCHEMA`] order, never the merge's insertion order, and
//! every value leaves here already XML-escaped.

use crate::error::{ReconError, Result};
use crate::merge::{FieldValue, MergedRecord};
use crate::model::Subfield;
use crate::schema::{field_for_tag, Cardinality, FieldSpec, SCHEMA};
use quick_xml::escape::{escape, unescape};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One output datafield.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub tag: String,
    pub ind1: char,
    pub ind2: char,
    /// Escaped subfield values in output order
    pub subfields: Vec<Subfield>,
}

/// Ordered blocks for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredUpdate {
    pub recid: String,
    pub blocks: Vec<Block>,
}

impl StructuredUpdate {
    pub fn tags(&self) -> Vec<&str> {
        self.blocks.iter().map(|b| b.tag.as_str()).collect()
    }
}

/// Encode a merged record.
///
/// Fails with [`ReconError::SchemaEncodingError`] when any value holds a
/// control character other than tab, newline or carriage return; the caller
/// skips the whole record in that case.
pub fn emit(merged: &MergedRecord) -> Result<StructuredUpdate> {
    check_encodable(&merged.recid, "001", &merged.recid)?;

    let mut blocks = Vec::new();
    for spec in SCHEMA.iter() {
        let Some(values) = merged.get(spec.field) else {
            continue;
        };
        let values = if spec.cardinality == Cardinality::Single && values.len() > 1 {
            warn!(
                recid = %merged.recid,
                field = %spec.field,
                count = values.len(),
                "Non-repeatable field has several values, keeping the first"
            );
            &values[..1]
        } else {
            values
        };

        for value in values {
            if let Some(block) = encode_block(&merged.recid, spec, value)? {
                blocks.push(block);
            }
        }
    }

    Ok(StructuredUpdate {
        recid: merged.recid.clone(),
        blocks,
    })
}

fn encode_block(recid: &str, spec: &FieldSpec, value: &FieldValue) -> Result<Option<Block>> {
    let mut subfields = Vec::with_capacity(value.subfields.len() + 1);
    for subfield in &value.subfields {
        if subfield.value.trim().is_empty() {
            continue;
        }
        if !subfield.code.is_ascii_alphanumeric() {
            return Err(encoding_error(
                recid,
                spec.tag,
                format!("invalid subfield code {:?}", subfield.code),
            ));
        }
        check_encodable(recid, spec.tag, &subfield.value)?;
        subfields.push(Subfield::new(subfield.code, escape(subfield.value.trim())));
    }
    if subfields.is_empty() {
        return Ok(None);
    }

    if let Some(code) = spec.provenance_code {
        let present = subfields.iter().any(|s| s.code == code);
        if !present && !value.provenance.is_empty() {
            check_encodable(recid, spec.tag, &value.provenance)?;
            subfields.push(Subfield::new(code, escape(value.provenance.as_str())));
        }
    }

    Ok(Some(Block {
        tag: spec.tag.to_string(),
        ind1: spec.ind1,
        ind2: spec.ind2,
        subfields,
    }))
}

fn check_encodable(recid: &str, tag: &str, value: &str) -> Result<()> {
    match value
        .chars()
        .find(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
    {
        Some(c) => Err(encoding_error(
            recid,
            tag,
            format!("control character U+{:04X}", u32::from(c)),
        )),
        None => Ok(()),
    }
}

fn encoding_error(recid: &str, tag: &str, reason: String) -> ReconError {
    ReconError::SchemaEncodingError {
        recid: recid.to_string(),
        tag: tag.to_string(),
        reason,
    }
}

/// Parse an update back into a merged record.
///
/// Values are unescaped and the provenance subfield, where the tag has one,
/// moves back into [`FieldValue::provenance`].
pub fn decode(update: &StructuredUpdate) -> Result<MergedRecord> {
    let mut merged = MergedRecord::new(&update.recid);
    for block in &update.blocks {
        let field = field_for_tag(&block.tag)
            .ok_or_else(|| encoding_error(&update.recid, &block.tag, "tag not in schema".to_string()))?;
        let provenance_code = field.spec().provenance_code;

        let mut provenance = String::new();
        let mut subfields = Vec::with_capacity(block.subfields.len());
        for subfield in &block.subfields {
            let value = unescape(&subfield.value)
                .map_err(|e| encoding_error(&update.recid, &block.tag, e.to_string()))?
                .into_owned();
            if Some(subfield.code) == provenance_code && provenance.is_empty() {
                provenance = value;
            } else {
                subfields.push(Subfield::new(subfield.code, value));
            }
        }
        merged.insert(field, FieldValue::new(subfields, provenance));
    }
    Ok(merged)
}
