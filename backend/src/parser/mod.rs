//! Rules-matrix CSV parser.
//!
//! Turns a `;`-delimited CSV buffer into a [`Matrix`]. The parser is pure:
//! locating and reading the file is the caller's concern.
//!
//! # Layout
//!
//! ```text
//!              col 0        col 1         col 2..
//! row 0        (ignored)    (ignored)     country headers
//! row 1..      category     subcategory   per-country text
//! ```
//!
//! A blank category cell repeats the category of the previous row.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ParseError, ParseResult};
use crate::models::{Country, CountryData, Matrix};

/// Field delimiter of the matrix export.
pub const DELIMITER: u8 = b';';

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// First column holding a country.
const FIRST_COUNTRY_COLUMN: usize = 2;

static TRAILING_PARENTHETICAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(.*?\)\s*$").expect("static regex"));

/// Parse a matrix from raw bytes.
///
/// # Example
/// ```
/// let csv = ";;France (Erledigt);Spanien\nMeldepflicht;;Ja;Nein\n";
/// let matrix = postcheck::parser::parse(csv.as_bytes()).unwrap();
///
/// assert_eq!(matrix.countries[0].label, "France");
/// assert_eq!(matrix.categories, vec!["Meldepflicht"]);
/// ```
pub fn parse(bytes: &[u8]) -> ParseResult<Matrix> {
    let text = decode(bytes);
    parse_str(&text)
}

/// Parse a matrix from already-decoded text.
pub fn parse_str(text: &str) -> ParseResult<Matrix> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rows = read_rows(text)?;

    let header = rows.first().ok_or(ParseError::EmptyFile)?;
    let (countries, columns) = read_header(header)?;

    let mut data: BTreeMap<String, CountryData> = BTreeMap::new();
    let mut categories: Vec<String> = Vec::new();
    let mut current_category: Option<String> = None;

    for row in rows.iter().skip(1) {
        if row.len() < 3 {
            continue;
        }

        let raw_category = row[0].trim();
        if !raw_category.is_empty() {
            current_category = Some(raw_category.to_string());
        }
        let Some(category) = current_category.as_deref() else {
            continue;
        };

        let subcategory = Some(row[1].trim()).filter(|s| !s.is_empty());

        if !categories.iter().any(|c| c == category) {
            categories.push(category.to_string());
        }

        for (col, cell) in row.iter().enumerate().skip(FIRST_COUNTRY_COLUMN) {
            let Some(Some(country_key)) = columns.get(col) else {
                continue;
            };
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }

            let entry = data
                .entry(country_key.clone())
                .or_insert_with(CountryData::new)
                .entry(category.to_string())
                .or_default();

            match subcategory {
                Some(sub) => entry.set_subcategory(sub, cell.to_string()),
                None => entry.set_value(cell.to_string()),
            }
        }
    }

    if categories.is_empty() {
        return Err(ParseError::NoCategories);
    }
    if data.is_empty() {
        return Err(ParseError::NoRuleData);
    }

    Ok(Matrix {
        countries,
        categories,
        data,
    })
}

/// Display label for a country key: drops one trailing `(...)` annotation.
pub fn country_label(key: &str) -> String {
    TRAILING_PARENTHETICAL.replace(key, "").trim().to_string()
}

/// Decode bytes to text, stripping a UTF-8 BOM.
///
/// Spreadsheet exports are not always UTF-8; anything that fails UTF-8
/// validation goes through encoding detection instead.
pub fn decode(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(decode_content(bytes, &detect_encoding(bytes))),
    }
}

/// Detect the encoding of raw bytes using chardet.
pub fn detect_encoding(bytes: &[u8]) -> String {
    let charset = chardet::detect(bytes).0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes with the given encoding label, falling back to Windows-1252.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    let encoding = encoding_rs::Encoding::for_label(encoding.as_bytes())
        .unwrap_or(encoding_rs::WINDOWS_1252);
    encoding.decode(bytes).0.into_owned()
}

/// All physical rows, blank lines included as a single empty cell.
fn read_rows(text: &str) -> ParseResult<Vec<Vec<String>>> {
    split_rows(text).into_iter().map(read_row).collect()
}

fn read_row(line: &str) -> ParseResult<Vec<String>> {
    if line.is_empty() {
        return Ok(vec![String::new()]);
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    let mut record = csv::StringRecord::new();
    reader.read_record(&mut record)?;
    Ok(record.iter().map(str::to_string).collect())
}

/// Split on line breaks outside quoted fields. The csv reader skips blank
/// lines, so rows are cut here and each one is read on its own.
fn split_rows(text: &str) -> Vec<&str> {
    let mut rows = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut field_start = true;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek().is_some_and(|&(_, next)| next == '"') {
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            continue;
        }

        match c {
            '"' if field_start => in_quotes = true,
            '\n' => {
                let line = &text[start..i];
                rows.push(line.strip_suffix('\r').unwrap_or(line));
                start = i + 1;
                field_start = true;
                continue;
            }
            c if c == DELIMITER as char => {
                field_start = true;
                continue;
            }
            _ => {}
        }
        field_start = false;
    }

    if start < text.len() {
        rows.push(&text[start..]);
    }
    rows
}

/// Countries in column order, plus a column index -> country key lookup.
fn read_header(header: &[String]) -> ParseResult<(Vec<Country>, Vec<Option<String>>)> {
    let mut countries = Vec::new();
    let mut columns = vec![None; header.len()];
    let mut seen = HashSet::new();

    for (col, cell) in header.iter().enumerate().skip(FIRST_COUNTRY_COLUMN) {
        let key = cell.trim();
        if key.is_empty() {
            continue;
        }
        if !seen.insert(key.to_string()) {
            return Err(ParseError::DuplicateCountry(key.to_string()));
        }
        columns[col] = Some(key.to_string());
        countries.push(Country {
            key: key.to_string(),
            label: country_label(key),
        });
    }

    if countries.is_empty() {
        return Err(ParseError::NoCountryHeaders);
    }
    Ok((countries, columns))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
;;France (Erledigt);Spanien;Polen (offen)
Meldepflichtige Entsendetätigkeit;;Ja, vor Beginn;Ja;
Mobile Arbeit;;keine Meldepflicht;;
Inhalt der Meldung;Arbeitgeber;Name, Anschrift;Name;
;Arbeitnehmer;Name, Geburtsdatum;;
";

    #[test]
    fn test_countries_and_labels() {
        let matrix = parse_str(SAMPLE).unwrap();

        let keys: Vec<_> = matrix.countries.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["France (Erledigt)", "Spanien", "Polen (offen)"]);

        let labels: Vec<_> = matrix.countries.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["France", "Spanien", "Polen"]);
    }

    #[test]
    fn test_country_label() {
        assert_eq!(country_label("France (Erledigt)"), "France");
        assert_eq!(country_label("Spanien"), "Spanien");
        assert_eq!(country_label("  Polen (offen)  "), "Polen");
        assert_eq!(country_label("Italien (Stand 2024) (neu)"), "Italien");
    }

    #[test]
    fn test_category_carry_forward_with_subcategory() {
        let matrix = parse_str(SAMPLE).unwrap();
        let fr = matrix.country_data("France (Erledigt)").unwrap();

        let content = &fr["Inhalt der Meldung"];
        assert_eq!(content.value(), None);
        assert_eq!(content.subcategory("Arbeitgeber"), Some("Name, Anschrift"));
        assert_eq!(content.subcategory("Arbeitnehmer"), Some("Name, Geburtsdatum"));
    }

    #[test]
    fn test_blank_category_row_without_subcategory_sets_value() {
        let csv = ";;FR\nNotification;;x\n;Deadline;y\n;;z\n";
        let matrix = parse_str(csv).unwrap();
        let entry = &matrix.data["FR"]["Notification"];

        // Third row carries the category forward and, lacking a subcategory,
        // overwrites the default text.
        assert_eq!(entry.value(), Some("z"));
        assert_eq!(entry.subcategory("Deadline"), Some("y"));
        assert_eq!(matrix.categories, vec!["Notification"]);
    }

    #[test]
    fn test_categories_in_first_seen_order() {
        let matrix = parse_str(SAMPLE).unwrap();
        assert_eq!(
            matrix.categories,
            vec![
                "Meldepflichtige Entsendetätigkeit",
                "Mobile Arbeit",
                "Inhalt der Meldung",
            ]
        );
    }

    #[test]
    fn test_sparse_country_has_no_data_entry() {
        let matrix = parse_str(SAMPLE).unwrap();
        assert!(matrix.has_country("Polen (offen)"));
        assert!(matrix.country_data("Polen (offen)").is_none());
        assert!(matrix.country_data("Spanien").is_some());
    }

    #[test]
    fn test_rows_before_first_category_are_skipped() {
        let csv = ";;FR\n;;orphan\nKat;;x\n";
        let matrix = parse_str(csv).unwrap();
        assert_eq!(matrix.data["FR"].len(), 1);
        assert_eq!(matrix.data["FR"]["Kat"].value(), Some("x"));
    }

    #[test]
    fn test_short_and_uneven_rows() {
        let csv = ";;FR;DE\nKat;;x\nshort;row\n\nWeitere;;;y;extra\n";
        let matrix = parse_str(csv).unwrap();
        assert_eq!(matrix.data["FR"]["Kat"].value(), Some("x"));
        assert_eq!(matrix.data["DE"]["Weitere"].value(), Some("y"));
        // "short;row" has two cells and never becomes a category.
        assert_eq!(matrix.categories, vec!["Kat", "Weitere"]);
    }

    #[test]
    fn test_columns_without_header_are_ignored() {
        let csv = ";;FR;;DE\nKat;;a;lost;b\n";
        let matrix = parse_str(csv).unwrap();
        assert_eq!(matrix.countries.len(), 2);
        assert_eq!(matrix.data["FR"]["Kat"].value(), Some("a"));
        assert_eq!(matrix.data["DE"]["Kat"].value(), Some("b"));
    }

    #[test]
    fn test_quoted_cell_with_delimiter() {
        let csv = ";;FR\nKat;;\"Frist; 24h vorher\"\n";
        let matrix = parse_str(csv).unwrap();
        assert_eq!(matrix.data["FR"]["Kat"].value(), Some("Frist; 24h vorher"));
    }

    #[test]
    fn test_bom_is_stripped() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"Ignored;;FR\nKat;;x\n");
        let matrix = parse(&bytes).unwrap();
        assert_eq!(matrix.countries[0].key, "FR");
    }

    #[test]
    fn test_latin1_input_is_decoded() {
        // "Entsendetätigkeit" with ä encoded as 0xE4
        let mut bytes = b";;FR\nEntsendet".to_vec();
        bytes.push(0xE4);
        bytes.extend_from_slice(b"tigkeit;;Ja\n");
        let matrix = parse(&bytes).unwrap();
        assert_eq!(matrix.categories.len(), 1);
        assert!(matrix.categories[0].starts_with("Entsendet"));
        assert!(matrix.categories[0].ends_with("tigkeit"));
    }

    #[test]
    fn test_decode_content_latin1() {
        let bytes: &[u8] = &[0x4D, 0x65, 0x6C, 0x64, 0x75, 0x6E, 0x67, 0x20, 0xE4];
        assert_eq!(decode_content(bytes, "iso-8859-1"), "Meldung ä");
    }

    #[test]
    fn test_duplicate_header_rejected() {
        let err = parse_str(";;FR; FR \nKat;;a;b\n").unwrap_err();
        assert!(matches!(err, ParseError::DuplicateCountry(ref k) if k == "FR"));
    }

    #[test]
    fn test_no_country_headers_rejected() {
        let err = parse_str("a;b;;\nKat;;x\n").unwrap_err();
        assert!(matches!(err, ParseError::NoCountryHeaders));
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(matches!(parse_str("").unwrap_err(), ParseError::EmptyFile));
    }

    #[test]
    fn test_no_categories_rejected() {
        let err = parse_str(";;FR\n;;x\n").unwrap_err();
        assert!(matches!(err, ParseError::NoCategories));
    }

    #[test]
    fn test_all_blank_cells_rejected() {
        let err = parse_str(";;FR;DE\nKat;;;\nWeitere;Sub; ;\n").unwrap_err();
        assert!(matches!(err, ParseError::NoRuleData));
        assert!(err.to_string().contains("no rule data"));
    }

    #[test]
    fn test_leading_blank_line_is_the_header() {
        let err = parse_str("\n;;FR\nKat;;x\n").unwrap_err();
        assert!(matches!(err, ParseError::NoCountryHeaders));
    }

    #[test]
    fn test_blank_rows_are_kept() {
        let rows = read_rows(";;FR\n\r\nKat;;x\n").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec![String::new()]);
        assert_eq!(rows[2], vec!["Kat", "", "x"]);
    }

    #[test]
    fn test_blank_row_keeps_current_category() {
        let csv = ";;FR\nKat;;x\n\n;Sub;y\n";
        let matrix = parse_str(csv).unwrap();
        assert_eq!(matrix.data["FR"]["Kat"].subcategory("Sub"), Some("y"));
        assert_eq!(matrix.categories, vec!["Kat"]);
    }

    #[test]
    fn test_quoted_cell_spanning_lines() {
        let csv = ";;FR\nKat;;\"erste Zeile\n\nzweite \"\"Zeile\"\"\"\nWeitere;;z";
        let rows = read_rows(csv).unwrap();
        assert_eq!(rows.len(), 3);

        let matrix = parse_str(csv).unwrap();
        assert_eq!(
            matrix.data["FR"]["Kat"].value(),
            Some("erste Zeile\n\nzweite \"Zeile\"")
        );
        assert_eq!(matrix.data["FR"]["Weitere"].value(), Some("z"));
    }

    #[test]
    fn test_country_data_keeps_row_order() {
        let matrix = parse_str(SAMPLE).unwrap();
        let fr = matrix.country_data("France (Erledigt)").unwrap();

        let keys: Vec<_> = fr.keys().map(String::as_str).collect();
        assert_eq!(keys, matrix.categories);

        let json = serde_json::to_string(fr).unwrap();
        assert!(json.find("Mobile Arbeit").unwrap() < json.find("Inhalt der Meldung").unwrap());
    }
}
