// 🏗️ Table Parser - recipient tables of unknown shape
// Sniffs header vs headerless, then hands off to a parser per format.

use crate::cleaner::name_from_email;
use crate::error::{DistribError, Result};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// KEYWORDS
// ============================================================================

/// Any of these in the first line (case-insensitive substring) marks a header row
pub const HEADER_KEYWORDS: &[&str] = &[
    "nom", "name", "email", "mail", "code", "id", "identifiant", "matricule",
];

pub const NAME_KEYWORDS: &[&str] = &["nom", "name", "prenom", "first"];
pub const EMAIL_KEYWORDS: &[&str] = &["email", "mail", "courriel"];
pub const CODE_KEYWORDS: &[&str] = &["code", "id", "identifiant", "matricule"];

/// Delimiters tried, in order, when a headerless table collapses to one column
pub const FALLBACK_DELIMITERS: &[char] = &[';', ',', '\t'];

// ============================================================================
// CORE TYPES
// ============================================================================

/// Detected layout of a recipient table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableFormat {
    /// First row names the columns
    Headered { delimiter: u8 },

    /// No header; `columns` is the width of the first row
    Headerless { columns: usize },
}

impl TableFormat {
    pub fn name(&self) -> String {
        match self {
            TableFormat::Headered { delimiter } => {
                format!("headered ('{}' delimited)", *delimiter as char)
            }
            TableFormat::Headerless { columns } => format!("headerless, {} column(s)", columns),
        }
    }
}

/// RawRecord - one parsed row, before cleaning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub name: String,
    pub email: String,
    pub code: String,

    /// 1-based line in the source table
    pub line_number: usize,
}

impl RawRecord {
    pub fn new(name: &str, email: &str, code: &str, line_number: usize) -> Self {
        RawRecord {
            name: name.to_string(),
            email: email.to_string(),
            code: code.to_string(),
            line_number,
        }
    }

    fn is_blank(&self) -> bool {
        self.name.trim().is_empty() && self.email.trim().is_empty() && self.code.trim().is_empty()
    }
}

/// Column index assigned to each logical role of a headered table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnRoles {
    pub name: Option<usize>,
    pub email: Option<usize>,
    pub code: Option<usize>,
}

// ============================================================================
// PARSER TRAIT
// ============================================================================

/// TableParser - turns table text into raw records for one format
pub trait TableParser {
    fn parse(&self, content: &str) -> Result<Vec<RawRecord>>;

    fn format(&self) -> TableFormat;
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Parse a recipient table from disk.
///
/// Any failure to open, decode, or parse the file is reported as
/// `DistribError::UnreadableTable`; no partial result is returned.
pub fn parse_table(path: &Path) -> Result<Vec<RawRecord>> {
    let unreadable = |reason: String| DistribError::UnreadableTable {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = std::fs::read(path).map_err(|e| unreadable(e.to_string()))?;
    let content = String::from_utf8(bytes).map_err(|e| unreadable(e.to_string()))?;

    let (format, records) = parse_table_str(&content).map_err(|e| unreadable(e.to_string()))?;
    info!(
        "Parsed {}: {} format, {} records",
        path.display(),
        format.name(),
        records.len()
    );

    Ok(records)
}

/// Parse table text, returning the detected format alongside the records
pub fn parse_table_str(content: &str) -> Result<(TableFormat, Vec<RawRecord>)> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let format = detect_format(content)?;
    let parser = get_parser(format);
    debug!("Using {} parser", parser.format().name());

    let records = parser
        .parse(content)?
        .into_iter()
        .filter(|r| !r.is_blank())
        .collect();

    Ok((format, records))
}

/// Decide the table layout from its first line
pub fn detect_format(content: &str) -> Result<TableFormat> {
    let first_line = content.lines().next().unwrap_or("").trim();

    if looks_like_header(first_line) {
        return Ok(TableFormat::Headered {
            delimiter: sniff_delimiter(first_line),
        });
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let columns = match reader.records().next() {
        Some(record) => record?.len(),
        None => 0,
    };

    Ok(TableFormat::Headerless { columns })
}

/// Header if a keyword appears and no cell of the line is itself an email address.
/// Labels that merely mention an address (`Email (ex: a@b.fr)`) still count as header.
pub fn looks_like_header(first_line: &str) -> bool {
    let lower = first_line.to_lowercase();
    let has_keyword = HEADER_KEYWORDS.iter().any(|k| lower.contains(k));
    has_keyword && !lower.split([',', ';', '\t']).any(is_address_cell)
}

/// Whole cell is a bare address: `local@domain.tld`, nothing around it
fn is_address_cell(cell: &str) -> bool {
    let cell = cell.trim().trim_matches('"').trim();
    let (local, domain) = match cell.split_once('@') {
        Some(parts) => parts,
        None => return false,
    };

    let allowed = |c: char| c.is_alphanumeric() || matches!(c, '.' | '_' | '%' | '+' | '-' | '\'');
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && local.chars().all(allowed)
        && domain.chars().all(allowed)
}

fn sniff_delimiter(line: &str) -> u8 {
    if line.contains(',') {
        b','
    } else if line.contains(';') {
        b';'
    } else if line.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

/// Factory: parser for a detected format
pub fn get_parser(format: TableFormat) -> Box<dyn TableParser> {
    match format {
        TableFormat::Headered { delimiter } => Box::new(HeaderedParser::new(delimiter)),
        TableFormat::Headerless { columns: 1 } => Box::new(SingleColumnParser::new()),
        TableFormat::Headerless { columns } => Box::new(PositionalParser::new(columns)),
    }
}

// ============================================================================
// HEADERED TABLES
// ============================================================================

pub struct HeaderedParser {
    delimiter: u8,
}

impl HeaderedParser {
    pub fn new(delimiter: u8) -> Self {
        HeaderedParser { delimiter }
    }
}

impl TableParser for HeaderedParser {
    fn parse(&self, content: &str) -> Result<Vec<RawRecord>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(content.as_bytes());

        let labels: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let roles = assign_roles(&labels);
        debug!("Column roles for {:?}: {:?}", labels, roles);

        let mut records = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let row = result?;
            let line = row.position().map(|p| p.line() as usize).unwrap_or(idx + 2);
            let cell = |col: Option<usize>| col.and_then(|c| row.get(c)).unwrap_or("");

            records.push(RawRecord::new(
                cell(roles.name),
                cell(roles.email),
                cell(roles.code),
                line,
            ));
        }

        Ok(records)
    }

    fn format(&self) -> TableFormat {
        TableFormat::Headered {
            delimiter: self.delimiter,
        }
    }
}

/// Assign columns to roles.
///
/// Pass 1: each label is checked against name, email, then code keywords;
/// the first column to match a role keeps it. Pass 2: columns that matched
/// nothing fill the still-empty roles in column order. Extra columns are
/// ignored.
pub fn assign_roles(labels: &[String]) -> ColumnRoles {
    let mut roles = ColumnRoles::default();
    let mut unmatched = Vec::new();

    for (idx, label) in labels.iter().enumerate() {
        let matches = |keywords: &[&str]| keywords.iter().any(|k| label.contains(k));

        if matches(NAME_KEYWORDS) {
            roles.name.get_or_insert(idx);
        } else if matches(EMAIL_KEYWORDS) {
            roles.email.get_or_insert(idx);
        } else if matches(CODE_KEYWORDS) {
            roles.code.get_or_insert(idx);
        } else {
            unmatched.push(idx);
        }
    }

    for idx in unmatched {
        if roles.name.is_none() {
            roles.name = Some(idx);
        } else if roles.email.is_none() {
            roles.email = Some(idx);
        } else if roles.code.is_none() {
            roles.code = Some(idx);
        }
    }

    roles
}

// ============================================================================
// HEADERLESS TABLES
// ============================================================================

/// Comma-separated rows read by position (2, 3, or more columns)
pub struct PositionalParser {
    columns: usize,
}

impl PositionalParser {
    pub fn new(columns: usize) -> Self {
        PositionalParser { columns }
    }
}

impl TableParser for PositionalParser {
    fn parse(&self, content: &str) -> Result<Vec<RawRecord>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(content.as_bytes());

        let mut records = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let row = result?;
            let line = row.position().map(|p| p.line() as usize).unwrap_or(idx + 1);
            let field = |i: usize| row.get(i).unwrap_or("");

            let record = if self.columns == 2 {
                two_field_record(field(0), field(1), line)
            } else {
                RawRecord::new(field(0), field(1), field(2), line)
            };
            records.push(record);
        }

        Ok(records)
    }

    fn format(&self) -> TableFormat {
        TableFormat::Headerless {
            columns: self.columns,
        }
    }
}

/// One combined column per line; each line is re-split on the first
/// fallback delimiter it contains.
pub struct SingleColumnParser;

impl SingleColumnParser {
    pub fn new() -> Self {
        SingleColumnParser
    }
}

impl Default for SingleColumnParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TableParser for SingleColumnParser {
    fn parse(&self, content: &str) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();

        for (idx, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            let parts: Vec<&str> = match FALLBACK_DELIMITERS.iter().find(|d| line.contains(**d)) {
                Some(delim) => line.split(*delim).map(str::trim).filter(|p| !p.is_empty()).collect(),
                None => vec![line],
            };

            let line_number = idx + 1;
            let record = match parts.as_slice() {
                [] => continue,
                [only] => RawRecord::new(&name_from_email(only), only, "", line_number),
                [first, second] => two_field_record(first, second, line_number),
                [name, email, code, ..] => RawRecord::new(name, email, code, line_number),
            };
            records.push(record);
        }

        Ok(records)
    }

    fn format(&self) -> TableFormat {
        TableFormat::Headerless { columns: 1 }
    }
}

/// Two fields are (email, code); swapped when only the second holds an address
fn two_field_record(first: &str, second: &str, line: usize) -> RawRecord {
    let (email, code) = if !first.contains('@') && second.contains('@') {
        (second, first)
    } else {
        (first, second)
    };

    RawRecord::new(&name_from_email(email), email, code, line)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn labels(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detect_headered() {
        let format = detect_format("Nom,Email,Code\nJean,jean@x.com,1\n").unwrap();
        assert_eq!(format, TableFormat::Headered { delimiter: b',' });

        let format = detect_format("matricule;courriel\n1;a@x.com\n").unwrap();
        assert_eq!(format, TableFormat::Headered { delimiter: b';' });
    }

    #[test]
    fn test_detect_headerless_by_column_count() {
        assert_eq!(
            detect_format("001,alice@x.com\n2,bob@x.com").unwrap(),
            TableFormat::Headerless { columns: 2 }
        );
        assert_eq!(
            detect_format("Alice,alice@x.com,1\n").unwrap(),
            TableFormat::Headerless { columns: 3 }
        );
        assert_eq!(
            detect_format("alice@x.com;1\n").unwrap(),
            TableFormat::Headerless { columns: 1 }
        );
    }

    #[test]
    fn test_email_in_first_line_is_not_a_header() {
        // "david" contains "id", but a line carrying an address is data
        assert!(!looks_like_header("David,david@x.com,1"));
        assert!(looks_like_header("Identifiant,Nom"));
        assert!(!looks_like_header("David;\"david@x.com\";1"));
    }

    #[test]
    fn test_header_mentioning_an_example_address() {
        assert!(looks_like_header("Nom,Email (ex: a@b.fr),Code"));

        let (format, records) =
            parse_table_str("Nom,Email (ex: a@b.fr),Code\nAnn,ann@x.com,1\n").unwrap();

        assert_eq!(format, TableFormat::Headered { delimiter: b',' });
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Ann");
        assert_eq!(records[0].email, "ann@x.com");
        assert_eq!(records[0].code, "1");
    }

    #[test]
    fn test_assign_roles_by_keyword() {
        let roles = assign_roles(&labels(&["code", "nom", "email"]));
        assert_eq!(roles.name, Some(1));
        assert_eq!(roles.email, Some(2));
        assert_eq!(roles.code, Some(0));
    }

    #[test]
    fn test_assign_roles_first_keyword_match_wins() {
        let roles = assign_roles(&labels(&["nom", "prenom", "mail", "matricule", "id"]));
        assert_eq!(roles.name, Some(0));
        assert_eq!(roles.email, Some(2));
        assert_eq!(roles.code, Some(3));
    }

    #[test]
    fn test_assign_roles_positional_fallback() {
        let roles = assign_roles(&labels(&["destinataire", "adresse", "numero"]));
        assert_eq!(roles.name, Some(0));
        assert_eq!(roles.email, Some(1));
        assert_eq!(roles.code, Some(2));

        let roles = assign_roles(&labels(&["code", "destinataire", "courriel", "extra"]));
        assert_eq!(roles.name, Some(1));
        assert_eq!(roles.email, Some(2));
        assert_eq!(roles.code, Some(0));
    }

    #[test]
    fn test_headered_parse_with_missing_cells() {
        let (_, records) = parse_table_str("Nom,Email,Code\nJean Dupont, jean@x.com ,07\nMarie,marie@x.com\n").unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0], RawRecord::new("Jean Dupont", " jean@x.com ", "07", 2));
        assert_eq!(records[1].code, "");
        assert_eq!(records[1].line_number, 3);
    }

    #[test]
    fn test_headered_parse_semicolon_delimited() {
        let (_, records) = parse_table_str("Email;Matricule;Nom\nann@x.com;12;Ann\n").unwrap();
        assert_eq!(records, vec![RawRecord::new("Ann", "ann@x.com", "12", 2)]);
    }

    #[test]
    fn test_headerless_three_columns() {
        let (_, records) = parse_table_str("Alice,alice@x.com,1\nBob,bob@x.com,2\n").unwrap();
        assert_eq!(records[0], RawRecord::new("Alice", "alice@x.com", "1", 1));
        assert_eq!(records[1], RawRecord::new("Bob", "bob@x.com", "2", 2));
    }

    #[test]
    fn test_headerless_two_columns_either_order() {
        let (_, records) = parse_table_str("001,alice@x.com\nbob@x.com,2").unwrap();

        assert_eq!(records[0].email, "alice@x.com");
        assert_eq!(records[0].code, "001");
        assert_eq!(records[0].name, "Alice");
        assert_eq!(records[1].email, "bob@x.com");
        assert_eq!(records[1].code, "2");
    }

    #[test]
    fn test_headerless_wide_rows_keep_first_three() {
        let (format, records) = parse_table_str("Ann,ann@x.com,3,extra,more\n").unwrap();
        assert_eq!(format, TableFormat::Headerless { columns: 5 });
        assert_eq!(records, vec![RawRecord::new("Ann", "ann@x.com", "3", 1)]);
    }

    #[test]
    fn test_single_column_resplits_lines() {
        let content = "Ann;ann@x.com;1\nbob@x.com\t2\ncarl@x.com\n\n";
        let (format, records) = parse_table_str(content).unwrap();

        assert_eq!(format, TableFormat::Headerless { columns: 1 });
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], RawRecord::new("Ann", "ann@x.com", "1", 1));
        assert_eq!(records[1], RawRecord::new("Bob", "bob@x.com", "2", 2));
        assert_eq!(records[2], RawRecord::new("Carl", "carl@x.com", "", 3));
    }

    #[test]
    fn test_bom_is_ignored() {
        let (format, _) = parse_table_str("\u{feff}Nom,Email,Code\nA,a@x.com,1\n").unwrap();
        assert_eq!(format, TableFormat::Headered { delimiter: b',' });
    }

    #[test]
    fn test_empty_table_parses_to_nothing() {
        let (format, records) = parse_table_str("").unwrap();
        assert_eq!(format, TableFormat::Headerless { columns: 0 });
        assert!(records.is_empty());
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let err = parse_table(Path::new("/no/such/table.csv")).unwrap_err();
        assert!(matches!(err, DistribError::UnreadableTable { .. }));
    }

    #[test]
    fn test_invalid_utf8_is_unreadable() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0xff, 0xfe, 0x41, 0x2c, 0x42]).unwrap();

        let err = parse_table(file.path()).unwrap_err();
        assert!(matches!(err, DistribError::UnreadableTable { .. }));
    }

    #[test]
    fn test_parse_table_from_disk() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "name,email,code").unwrap();
        writeln!(file, "Zoe,zoe@x.com,42").unwrap();

        let records = parse_table(file.path()).unwrap();
        assert_eq!(records, vec![RawRecord::new("Zoe", "zoe@x.com", "42", 2)]);
    }
}
