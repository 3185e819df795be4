//! MARCXML input and output.
//!
//! The reader turns a `<collection>` of catalogue records into
//! [`AuthoritativeRecord`]s, keeping only the datafields the schema knows.
//! The writer serializes [`StructuredUpdate`]s as one `<collection>` for the
//! catalogue's bulk uploader.

use crate::emitter::StructuredUpdate;
use crate::error::{OptionExt, ReconError, Result};
use crate::model::{AuthoritativeRecord, Subfield};
use crate::schema::{field_for_tag, Field};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

const MARC_NAMESPACE: &str = "http://www.loc.gov/MARC21/slim";

#[derive(Debug)]
struct OpenDatafield {
    tag: String,
    ind1: char,
    subfields: Vec<Subfield>,
}

#[derive(Debug, Default)]
struct OpenRecord {
    recid: Option<String>,
    fields: BTreeMap<Field, Vec<Vec<Subfield>>>,
}

/// Read a MARCXML file.
pub fn read_records_file(path: &Path) -> Result<Vec<AuthoritativeRecord>> {
    let xml = std::fs::read_to_string(path)?;
    let records = read_records(&xml)?;
    info!(path = %path.display(), records = records.len(), "Read authoritative records");
    Ok(records)
}

/// Parse a MARCXML document. Namespace prefixes are ignored.
pub fn read_records(xml: &str) -> Result<Vec<AuthoritativeRecord>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut record: Option<OpenRecord> = None;
    let mut datafield: Option<OpenDatafield> = None;
    let mut controlfield: Option<String> = None;
    let mut subfield_code: Option<char> = None;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"record" => record = Some(OpenRecord::default()),
                b"controlfield" => {
                    controlfield = Some(attribute(&e, b"tag")?.ok_or_xml("controlfield without tag")?);
                    text.clear();
                }
                b"datafield" => {
                    let tag = attribute(&e, b"tag")?.ok_or_xml("datafield without tag")?;
                    let ind1 = attribute(&e, b"ind1")?
                        .and_then(|i| i.chars().next())
                        .unwrap_or(' ');
                    datafield = Some(OpenDatafield {
                        tag,
                        ind1,
                        subfields: Vec::new(),
                    });
                }
                b"subfield" => {
                    let code = attribute(&e, b"code")?
                        .and_then(|c| c.chars().next())
                        .ok_or_xml("subfield without code")?;
                    subfield_code = Some(code);
                    text.clear();
                }
                _ => {}
            },
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::CData(t) => text.push_str(&String::from_utf8_lossy(&t)),
            Event::End(e) => match e.local_name().as_ref() {
                b"controlfield" => {
                    if let (Some(tag), Some(open)) = (controlfield.take(), record.as_mut()) {
                        if tag == "001" {
                            open.recid = Some(text.trim().to_string());
                        }
                    }
                    text.clear();
                }
                b"subfield" => {
                    if let (Some(code), Some(open)) = (subfield_code.take(), datafield.as_mut()) {
                        open.subfields.push(Subfield::new(code, text.trim()));
                    }
                    text.clear();
                }
                b"datafield" => {
                    if let (Some(closed), Some(open)) = (datafield.take(), record.as_mut()) {
                        if let Some(field) = datafield_field(&closed) {
                            open.fields.entry(field).or_default().push(closed.subfields);
                        }
                    }
                }
                b"record" => {
                    if let Some(closed) = record.take() {
                        match closed.recid {
                            Some(recid) if !recid.is_empty() => {
                                records.push(AuthoritativeRecord::from_fields(recid, closed.fields));
                            }
                            _ => warn!("Skipping MARCXML record without 001"),
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    debug!(records = records.len(), "Parsed MARCXML");
    Ok(records)
}

/// Schema field a datafield belongs to.
///
/// `8564` electronic locations count as fulltext files when they point at
/// the article text, so append runs do not attach a second copy.
fn datafield_field(datafield: &OpenDatafield) -> Option<Field> {
    if datafield.tag == "856" && datafield.ind1 == '4' {
        let is_fulltext = datafield.subfields.iter().any(|s| match s.code {
            'y' => s.value.eq_ignore_ascii_case("fulltext"),
            'u' => s.value.to_ascii_lowercase().ends_with(".pdf"),
            _ => false,
        });
        return is_fulltext.then_some(Field::FulltextFile);
    }
    field_for_tag(&datafield.tag)
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| ReconError::Xml(e.to_string()))?;
        if attr.key.local_name().as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Write updates to `path` as one MARCXML collection.
pub fn write_updates_file(path: &Path, updates: &[StructuredUpdate]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_updates(&mut writer, updates)?;
    writer.flush()?;
    Ok(())
}

/// Serialize updates. Values are written as they are, already escaped.
pub fn write_updates<W: Write>(writer: W, updates: &[StructuredUpdate]) -> Result<()> {
    let mut xml = Writer::new_with_indent(writer, b' ', 2);
    xml.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut collection = BytesStart::new("collection");
    collection.push_attribute(("xmlns", MARC_NAMESPACE));
    xml.write_event(Event::Start(collection))?;

    for update in updates {
        xml.write_event(Event::Start(BytesStart::new("record")))?;

        let mut control = BytesStart::new("controlfield");
        control.push_attribute(("tag", "001"));
        xml.write_event(Event::Start(control))?;
        xml.write_event(Event::Text(BytesText::new(&update.recid)))?;
        xml.write_event(Event::End(BytesEnd::new("controlfield")))?;

        for block in &update.blocks {
            let mut datafield = BytesStart::new("datafield");
            datafield.push_attribute(("tag", block.tag.as_str()));
            datafield.push_attribute(("ind1", block.ind1.to_string().as_str()));
            datafield.push_attribute(("ind2", block.ind2.to_string().as_str()));
            xml.write_event(Event::Start(datafield))?;

            for subfield in &block.subfields {
                let mut element = BytesStart::new("subfield");
                element.push_attribute(("code", subfield.code.to_string().as_str()));
                xml.write_event(Event::Start(element))?;
                xml.write_event(Event::Text(BytesText::from_escaped(subfield.value.as_str())))?;
                xml.write_event(Event::End(BytesEnd::new("subfield")))?;
            }

            xml.write_event(Event::End(BytesEnd::new("datafield")))?;
        }

        xml.write_event(Event::End(BytesEnd::new("record")))?;
    }

    xml.write_event(Event::End(BytesEnd::new("collection")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::Block;
    use crate::model::PageRange;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<collection xmlns="http://www.loc.gov/MARC21/slim">
  <record>
    <controlfield tag="001">1234</controlfield>
    <datafield tag="245" ind1=" " ind2=" ">
      <subfield code="a">Structure of &amp; Hypernuclei</subfield>
    </datafield>
    <datafield tag="773" ind1=" " ind2=" ">
      <subfield code="p">Acta Phys.Polon.</subfield>
      <subfield code="v">B45</subfield>
      <subfield code="y">2014</subfield>
      <subfield code="c">1011-1020</subfield>
    </datafield>
    <datafield tag="856" ind1="4" ind2=" ">
      <subfield code="u">http://example.org/1234.pdf</subfield>
    </datafield>
    <datafield tag="999" ind1=" " ind2=" ">
      <subfield code="a">ignored</subfield>
    </datafield>
  </record>
  <record>
    <datafield tag="245" ind1=" " ind2=" ">
      <subfield code="a">No identifier</subfield>
    </datafield>
  </record>
  <marc:record xmlns:marc="http://www.loc.gov/MARC21/slim">
    <marc:controlfield tag="001">99</marc:controlfield>
    <marc:datafield tag="520" ind1=" " ind2=" ">
      <marc:subfield code="a">Existing abstract</marc:subfield>
    </marc:datafield>
  </marc:record>
</collection>"#;

    #[test]
    fn test_read_records() {
        let records = read_records(SAMPLE).expect("valid MARCXML");
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.recid, "1234");
        assert_eq!(first.title, "Structure of & Hypernuclei");
        assert_eq!(first.volume, Some(45));
        assert_eq!(first.year, Some(2014));
        assert_eq!(first.page_range, Some(PageRange::new(1011, Some(1020))));
        assert!(first.has_field(Field::FulltextFile));
        assert!(!first.has_field(Field::Abstract));

        let second = &records[1];
        assert_eq!(second.recid, "99");
        assert!(second.has_field(Field::Abstract));
        assert_eq!(second.volume, None);
    }

    #[test]
    fn test_missing_tag_is_an_error() {
        let xml = r#"<collection><record><datafield ind1=" "></datafield></record></collection>"#;
        let err = read_records(xml).expect_err("datafield without tag");
        assert!(matches!(err, ReconError::Xml(_)));
    }

    #[test]
    fn test_write_updates() {
        let update = StructuredUpdate {
            recid: "1234".to_string(),
            blocks: vec![Block {
                tag: "520".to_string(),
                ind1: ' ',
                ind2: ' ',
                subfields: vec![
                    Subfield::new('a', "a &lt; b &amp; c"),
                    Subfield::new('9', "publisher"),
                ],
            }],
        };
        let mut out = Vec::new();
        write_updates(&mut out, &[update]).expect("writable");
        let xml = String::from_utf8(out).expect("utf-8");

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains(r#"<controlfield tag="001">1234</controlfield>"#));
        assert!(xml.contains(r#"<datafield tag="520" ind1=" " ind2=" ">"#));
        // not escaped twice
        assert!(xml.contains(r#"<subfield code="a">a &lt; b &amp; c</subfield>"#));

        let records = read_records(&xml).expect("re-readable");
        assert_eq!(records[0].subfield(Field::Abstract, 'a'), Some("a < b & c"));
    }
}
