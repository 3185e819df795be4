use bibrecon::config::RunConfig;
use bibrecon::emitter::decode;
use bibrecon::index::CandidateIndex;
use bibrecon::loader;
use bibrecon::marcxml;
use bibrecon::merge::PubInfoPart;
use bibrecon::pipeline::Reconciler;
use bibrecon::schema::{Field, MergeMode};
use bibrecon::Result;

const RECORDS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<collection xmlns="http://www.loc.gov/MARC21/slim">
  <record>
    <controlfield tag="001">1001</controlfield>
    <datafield tag="245" ind1=" " ind2=" ">
      <subfield code="a">Structure of Λ Hypernuclei</subfield>
    </datafield>
    <datafield tag="773" ind1=" " ind2=" ">
      <subfield code="p">Acta Phys.Polon.</subfield>
      <subfield code="v">B45</subfield>
      <subfield code="y">2014</subfield>
      <subfield code="c">1011-1020</subfield>
    </datafield>
  </record>
  <record>
    <controlfield tag="001">1002</controlfield>
    <datafield tag="245" ind1=" " ind2=" ">
      <subfield code="a">Kaon production near threshold</subfield>
    </datafield>
    <datafield tag="773" ind1=" " ind2=" ">
      <subfield code="v">B46</subfield>
      <subfield code="y">2015</subfield>
      <subfield code="c">9999</subfield>
    </datafield>
    <datafield tag="520" ind1=" " ind2=" ">
      <subfield code="a">Catalogue abstract.</subfield>
    </datafield>
  </record>
  <record>
    <controlfield tag="001">1003</controlfield>
    <datafield tag="245" ind1=" " ind2=" ">
      <subfield code="a">Study of Quark Gluon Plasma</subfield>
    </datafield>
    <datafield tag="773" ind1=" " ind2=" ">
      <subfield code="v">B45</subfield>
      <subfield code="y">2014</subfield>
      <subfield code="c">2000</subfield>
    </datafield>
  </record>
</collection>"#;

const CANDIDATES_CSV: &str = "id,title,volume,year,issue,pages,abstract\n\
    v45p1011,Structure of $\\Lambda$ hypernuclei,45,2014,5,1011-1022,Hypernuclei are studied.Results follow.\n\
    v46p0101,KAON PRODUCTION NEAR THRESHOLD.,46,2015,2,101-110,\n\
    v45p2100,Measurement of Neutrino Oscillation,45,2014,5,2100-2110,Neutrinos.\n";

fn write_inputs(dir: &std::path::Path) -> Result<(std::path::PathBuf, std::path::PathBuf)> {
    let records = dir.join("records.xml");
    let candidates = dir.join("export.csv");
    std::fs::write(&records, RECORDS)?;
    std::fs::write(&candidates, CANDIDATES_CSV)?;
    Ok((records, candidates))
}

#[test]
fn test_append_run_end_to_end() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (records_path, candidates_path) = write_inputs(dir.path())?;

    let mut config = RunConfig::from_toml(
        r#"
        [source]
        name = "actaphys"
        fulltext_template = "https://www.actaphys.uj.edu.pl/fulltext?series=Reg&vol={volume}&page={page}"
        "#,
    )?;
    config.matching.fuzzy_threshold = 0.6;

    let records = marcxml::read_records_file(&records_path)?;
    let index = CandidateIndex::build(loader::load_candidates(&candidates_path, &config.source)?);
    let (updates, summary) = Reconciler::new(&index, &config).run(&records);

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.emitted, 2);
    assert_eq!(summary.skipped_by_category.get("no_match_found"), Some(&1));
    assert_eq!(summary.exact_key_matches, 1);
    assert_eq!(summary.fuzzy_matches, 1);

    // 1001: exact key (45, 1011); abstract and fulltext added
    let first = &updates[0];
    assert_eq!(first.recid, "1001");
    assert_eq!(first.tags(), vec!["520", "FFT"]);
    let decoded = decode(first)?;
    let abstract_value = &decoded.get(Field::Abstract).expect("abstract")[0];
    assert_eq!(abstract_value.subfields[0].value, "Hypernuclei are studied. Results follow.");
    assert_eq!(abstract_value.provenance, "actaphys");

    // 1002: page 9999 misses the key, title matches within the volume window;
    // the catalogue already has an abstract so only the fulltext is added
    let second = &updates[1];
    assert_eq!(second.recid, "1002");
    assert_eq!(second.tags(), vec!["FFT"]);
    assert_eq!(
        second.blocks[0].subfields[0].value,
        "https://www.actaphys.uj.edu.pl/fulltext?series=Reg&amp;vol=46&amp;page=101"
    );

    let out = dir.path().join("updates.xml");
    marcxml::write_updates_file(&out, &updates)?;
    let written = std::fs::read_to_string(&out)?;
    assert!(written.contains(r#"<controlfield tag="001">1001</controlfield>"#));
    assert!(written.contains("vol=46&amp;page=101"));
    assert!(!written.contains("&amp;amp;"));
    Ok(())
}

#[test]
fn test_correct_run_end_to_end() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (records_path, candidates_path) = write_inputs(dir.path())?;

    let config = RunConfig::from_toml(
        r#"
        [matching]
        strategy = "fuzzy_only"
        fuzzy_threshold = 0.6

        [merge]
        mode = "correct"
        correct_parts = ["issue", "page_range"]

        [source]
        name = "cpc"
        "#,
    )?;
    assert_eq!(config.merge.mode, MergeMode::Correct);

    let records = marcxml::read_records_file(&records_path)?;
    let index = CandidateIndex::build(loader::load_candidates(&candidates_path, &config.source)?);
    let reconciler = Reconciler::new(&index, &config);

    let report = reconciler.process(&records[0]);
    let update = report.update().expect("corrected record");
    assert_eq!(update.tags(), vec!["773"]);
    let codes: Vec<(char, &str)> = update.blocks[0]
        .subfields
        .iter()
        .map(|s| (s.code, s.value.as_str()))
        .collect();
    assert_eq!(
        codes,
        vec![('c', "1011-1022"), ('n', "5"), ('p', "Acta Phys.Polon."), ('v', "B45"), ('y', "2014")]
    );
    assert_eq!(report.corrections.len(), 2);
    assert_eq!(report.corrections[1].part, PubInfoPart::PageRange);

    // 1002: first page 101 is too far from the catalogue's 9999, so only the
    // issue is corrected and the page range stays
    let report = reconciler.process(&records[1]);
    assert_eq!(report.field_failures, 1);
    assert_eq!(report.corrections.len(), 1);
    assert_eq!(report.corrections[0].part, PubInfoPart::Issue);
    let update = report.update().expect("issue correction");
    assert!(update.blocks[0].subfields.iter().any(|s| s.code == 'c' && s.value == "9999"));
    Ok(())
}

#[test]
fn test_json_source_and_year_filter() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let records_path = dir.path().join("records.xml");
    std::fs::write(&records_path, RECORDS)?;
    let json_path = dir.path().join("export.json");
    std::fs::write(
        &json_path,
        r#"{"articles": [
            {"doi": "10.5506/APhysPolB.45.1011", "title": "Structure of Lambda Hypernuclei",
             "cite": {"vol": "B45", "page": "1011"}, "year": 2014}
        ]}"#,
    )?;

    let config = RunConfig::from_toml(
        r#"
        [source]
        name = "json-export"
        records_pointer = "/articles"

        [source.columns]
        id = "doi"
        volume = "/cite/vol"
        page_start = "/cite/page"

        [filter]
        max_year = 2015
        "#,
    )?;

    let records = marcxml::read_records_file(&records_path)?;
    let index = CandidateIndex::build(loader::load_candidates(&json_path, &config.source)?);
    let (updates, summary) = Reconciler::new(&index, &config).run(&records);

    assert_eq!(updates.len(), 0, "no abstract or fulltext in this export");
    assert_eq!(summary.skipped_by_category.get("out_of_scope"), Some(&1));
    assert_eq!(summary.skipped_by_category.get("nothing_to_merge"), Some(&1));
    assert_eq!(summary.skipped_by_category.get("no_match_found"), Some(&1));
    Ok(())
}
