use std::path::Path;

use super::model::{FileType, Parsed, Series, Source};
use crate::error::ParseError;

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Parse a measurement from a path or an in-memory upload.  Dispatch by
/// extension unless `file_type` overrides it.
///
/// Supported formats:
/// * `.csv` – headered table with a frequency and a magnitude column
/// * `.xml` – `<point freq="..." mag="..."/>` elements at any depth
pub fn parse(source: &Source, file_type: Option<FileType>) -> Result<Parsed, ParseError> {
    let file_type = match file_type {
        Some(t) => t,
        None => FileType::from_name(&source.file_name())?,
    };
    match source {
        Source::Path(path) => parse_path(path, file_type),
        Source::Bytes { data, .. } => parse_bytes(data, file_type),
    }
}

/// Read `path` and parse it as `file_type`.
pub fn parse_path(path: &Path, file_type: FileType) -> Result<Parsed, ParseError> {
    let data = std::fs::read(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_bytes(&data, file_type)
}

/// Parse raw bytes as `file_type`.
pub fn parse_bytes(data: &[u8], file_type: FileType) -> Result<Parsed, ParseError> {
    let parsed = match file_type {
        FileType::Csv => parse_csv(data)?,
        FileType::Xml => parse_xml(data)?,
        FileType::Binary => {
            return Err(ParseError::Unsupported(
                "binary measurement dumps are not supported".into(),
            ))
        }
    };
    log::debug!(
        "parsed {} points from {file_type} ({} skipped)",
        parsed.series.len(),
        parsed.skipped
    );
    Ok(parsed)
}

// ---------------------------------------------------------------------------
// CSV parser
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names.
///
/// A column whose name starts with `freq` (any case) is the frequency axis;
/// the first other column whose name contains `mag`, `response` or `amp` is
/// the magnitude.  Without a `freq*` column the first two columns are taken
/// positionally.  Every cell of both columns must be a finite number.
pub fn parse_csv(data: &[u8]) -> Result<Parsed, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data);
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let (freq_idx, mag_idx) = locate_columns(&headers)?;

    let mut freqs = Vec::new();
    let mut mags = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result?;
        freqs.push(parse_cell(record.get(freq_idx), row_no, &headers[freq_idx])?);
        mags.push(parse_cell(record.get(mag_idx), row_no, &headers[mag_idx])?);
    }

    if freqs.is_empty() {
        return Err(ParseError::Empty);
    }

    Ok(Parsed {
        series: Series { freqs, mags },
        skipped: 0,
    })
}

fn locate_columns(headers: &[String]) -> Result<(usize, usize), ParseError> {
    let lower: Vec<String> = headers.iter().map(|h| h.to_ascii_lowercase()).collect();

    if let Some(freq_idx) = lower.iter().position(|h| h.starts_with("freq")) {
        let mag_idx = lower
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != freq_idx)
            .find(|(_, h)| h.contains("mag") || h.contains("response") || h.contains("amp"))
            .map(|(i, _)| i)
            .ok_or_else(|| ParseError::MissingMagnitudeColumn(headers[freq_idx].clone()))?;
        return Ok((freq_idx, mag_idx));
    }

    if headers.len() < 2 {
        return Err(ParseError::TooFewColumns(headers.len()));
    }
    Ok((0, 1))
}

fn parse_cell(cell: Option<&str>, row: usize, column: &str) -> Result<f64, ParseError> {
    let raw = cell.unwrap_or("");
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParseError::NonNumeric {
            row,
            column: column.to_string(),
            value: raw.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// XML parser
// ---------------------------------------------------------------------------

/// Vendor XML shapes vary; the common denominator is
///
/// ```xml
/// <data>
///   <point freq="50" mag="1.0"/>
///   ...
/// </data>
/// ```
///
/// `point` elements may sit at any depth.  A point missing either attribute
/// is skipped and counted in [`Parsed::skipped`] instead of failing the file;
/// a present but non-numeric attribute is still an error.
pub fn parse_xml(data: &[u8]) -> Result<Parsed, ParseError> {
    let text = std::str::from_utf8(data)?;
    // Vendor exports often carry a DOCTYPE line.
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = roxmltree::Document::parse_with_options(text, options)?;

    let mut freqs = Vec::new();
    let mut mags = Vec::new();
    let mut skipped = 0;

    for (i, point) in doc
        .descendants()
        .filter(|n| n.has_tag_name("point"))
        .enumerate()
    {
        let (Some(freq), Some(mag)) = (point.attribute("freq"), point.attribute("mag")) else {
            skipped += 1;
            continue;
        };
        freqs.push(parse_cell(Some(freq.trim()), i, "freq")?);
        mags.push(parse_cell(Some(mag.trim()), i, "mag")?);
    }

    if skipped > 0 {
        log::warn!("skipped {skipped} <point> element(s) missing freq or mag");
    }
    if freqs.is_empty() {
        return Err(ParseError::Empty);
    }

    Ok(Parsed {
        series: Series { freqs, mags },
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_named_columns() {
        let parsed = parse_csv(b"freq,mag\n100,0.5\n200,0.8\n300,0.3\n").unwrap();
        assert_eq!(parsed.series.freqs, vec![100.0, 200.0, 300.0]);
        assert_eq!(parsed.series.mags, vec![0.5, 0.8, 0.3]);
        assert_eq!(parsed.skipped, 0);
    }

    #[test]
    fn csv_case_insensitive_and_companion_search() {
        let data = b"Index,Frequency (Hz),Phase,Response dB\n0,10,1.0,-3.5\n1,20,1.1,-4.0\n";
        let parsed = parse_csv(data).unwrap();
        assert_eq!(parsed.series.freqs, vec![10.0, 20.0]);
        assert_eq!(parsed.series.mags, vec![-3.5, -4.0]);
    }

    #[test]
    fn csv_first_magnitude_match_wins() {
        let data = b"freq,amplitude,magnitude\n1,2,3\n";
        let parsed = parse_csv(data).unwrap();
        assert_eq!(parsed.series.mags, vec![2.0]);
    }

    #[test]
    fn csv_positional_fallback() {
        let parsed = parse_csv(b"hz,db\n1.5,2.5\n3,4\n").unwrap();
        assert_eq!(parsed.series.freqs, vec![1.5, 3.0]);
        assert_eq!(parsed.series.mags, vec![2.5, 4.0]);
    }

    #[test]
    fn csv_preserves_source_order() {
        let parsed = parse_csv(b"freq,mag\n300,3\n100,1\n").unwrap();
        assert_eq!(parsed.series.freqs, vec![300.0, 100.0]);
    }

    #[test]
    fn csv_errors() {
        assert!(matches!(
            parse_csv(b"freq,mag\n100,abc\n"),
            Err(ParseError::NonNumeric { row: 0, .. })
        ));
        assert!(matches!(
            parse_csv(b"freq,mag\n100,nan\n"),
            Err(ParseError::NonNumeric { .. })
        ));
        assert!(matches!(
            parse_csv(b"freq,phase\n1,2\n"),
            Err(ParseError::MissingMagnitudeColumn(_))
        ));
        assert!(matches!(
            parse_csv(b"only\n1\n"),
            Err(ParseError::TooFewColumns(1))
        ));
        assert!(matches!(parse_csv(b"freq,mag\n"), Err(ParseError::Empty)));
    }

    #[test]
    fn xml_points_and_skips() {
        let data = br#"<data><point freq="50" mag="1.0"/><point freq="150" mag="2.0"/><point freq="250"/></data>"#;
        let parsed = parse_xml(data).unwrap();
        assert_eq!(parsed.series.freqs, vec![50.0, 150.0]);
        assert_eq!(parsed.series.mags, vec![1.0, 2.0]);
        assert_eq!(parsed.skipped, 1);
    }

    #[test]
    fn xml_nested_points() {
        let data = br#"<fra><sweep><trace><point freq="1" mag="2"/></trace></sweep></fra>"#;
        let parsed = parse_xml(data).unwrap();
        assert_eq!(parsed.series.freqs, vec![1.0]);
    }

    #[test]
    fn xml_with_doctype() {
        let data = br#"<?xml version="1.0"?>
<!DOCTYPE data SYSTEM "fra.dtd">
<data><point freq="50" mag="1.0"/><point freq="60" mag="1.5"/></data>"#;
        let parsed = parse_xml(data).unwrap();
        assert_eq!(parsed.series.freqs, vec![50.0, 60.0]);
        assert_eq!(parsed.series.mags, vec![1.0, 1.5]);
    }

    #[test]
    fn xml_errors() {
        assert!(matches!(
            parse_xml(br#"<data><point freq="x" mag="1"/></data>"#),
            Err(ParseError::NonNumeric { .. })
        ));
        assert!(matches!(parse_xml(b"<data>"), Err(ParseError::Xml(_))));
        assert!(matches!(
            parse_xml(br#"<data><point mag="1"/></data>"#),
            Err(ParseError::Empty)
        ));
    }

    #[test]
    fn dispatch_by_name_and_override() {
        let src = Source::Bytes {
            file_name: "sweep.csv".into(),
            data: b"freq,mag\n1,2\n".to_vec(),
        };
        assert_eq!(parse(&src, None).unwrap().series.len(), 1);

        let src = Source::Bytes {
            file_name: "upload".into(),
            data: br#"<d><point freq="1" mag="2"/></d>"#.to_vec(),
        };
        assert!(parse(&src, None).is_err());
        assert_eq!(parse(&src, Some(FileType::Xml)).unwrap().series.len(), 1);

        let src = Source::Bytes {
            file_name: "raw.bin".into(),
            data: vec![0, 1, 2],
        };
        assert!(matches!(parse(&src, None), Err(ParseError::Unsupported(_))));
    }

    #[test]
    fn parse_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.csv");
        std::fs::write(&path, "freq,mag\n10,1\n20,2\n").unwrap();
        let parsed = parse(&Source::Path(path), None).unwrap();
        assert_eq!(parsed.series.freqs, vec![10.0, 20.0]);

        let missing = dir.path().join("missing.csv");
        assert!(matches!(
            parse(&Source::Path(missing), None),
            Err(ParseError::Io { .. })
        ));
    }
}
