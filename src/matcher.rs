// 🔗 Recipient Matcher - joins cleaned recipients to scanned files
// Each code is probed under four key variants; the first hit wins.

use crate::cleaner::{clean_records, Diagnostic, Recipient, CODE_WIDTH};
use crate::parser::parse_table;
use crate::scanner::{scan_directory, FileTable};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ============================================================================
// KEY VARIANTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyVariant {
    /// Code as cleaned
    Exact,

    /// Leading zeros removed ("007" → "7")
    StrippedZeros,

    /// Left-padded with zeros to three characters ("7" → "007")
    Padded,

    /// Everything before the first '.' ("12.5" → "12")
    IntegerPart,
}

impl KeyVariant {
    /// Probe order
    pub const ALL: [KeyVariant; 4] = [
        KeyVariant::Exact,
        KeyVariant::StrippedZeros,
        KeyVariant::Padded,
        KeyVariant::IntegerPart,
    ];

    pub fn apply(&self, code: &str) -> String {
        match self {
            KeyVariant::Exact => code.to_string(),
            KeyVariant::StrippedZeros => code.trim_start_matches('0').to_string(),
            KeyVariant::Padded => zero_fill(code, CODE_WIDTH),
            KeyVariant::IntegerPart => code.split('.').next().unwrap_or("").to_string(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            KeyVariant::Exact => "exact",
            KeyVariant::StrippedZeros => "stripped zeros",
            KeyVariant::Padded => "padded",
            KeyVariant::IntegerPart => "integer part",
        }
    }
}

/// Left-pad with zeros to `width`; a leading sign stays in front ("-5" → "-05")
fn zero_fill(code: &str, width: usize) -> String {
    let (sign, digits) = match code.chars().next() {
        Some(c @ ('-' | '+')) => (c.to_string(), &code[1..]),
        _ => (String::new(), code),
    };
    let fill = width.saturating_sub(sign.len() + digits.chars().count());
    format!("{}{}{}", sign, "0".repeat(fill), digits)
}

/// Candidate keys for a code, in probe order (empty keys are skipped)
pub fn candidate_keys(code: &str) -> Vec<(KeyVariant, String)> {
    KeyVariant::ALL
        .iter()
        .map(|variant| (*variant, variant.apply(code)))
        .filter(|(_, key)| !key.is_empty())
        .collect()
}

// ============================================================================
// RESULTS
// ============================================================================

/// MatchResult - one recipient paired with one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub name: String,
    pub email: String,
    pub file_path: PathBuf,

    /// Cleaned code of the recipient
    pub code: String,

    /// Which key variant found the file
    pub variant: KeyVariant,

    pub line_number: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchReport {
    pub matches: Vec<MatchResult>,
    pub diagnostics: Vec<Diagnostic>,

    /// Recipients left after cleaning
    pub total_records: usize,

    /// Files found in the directory
    pub total_files: usize,
}

impl MatchReport {
    pub fn summary(&self) -> String {
        format!(
            "Matched {}/{} recipients against {} files ({} diagnostics)",
            self.matches.len(),
            self.total_records,
            self.total_files,
            self.diagnostics.len()
        )
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

// ============================================================================
// JOINER
// ============================================================================

/// Look up one code; returns the variant that hit and the file path
pub fn find_file<'a>(code: &str, files: &'a FileTable) -> Option<(KeyVariant, &'a PathBuf)> {
    candidate_keys(code)
        .into_iter()
        .find_map(|(variant, key)| files.get(&key).map(|path| (variant, path)))
}

/// Join cleaned recipients against the file table.
///
/// Recipients without an email or code, and recipients whose code misses
/// under every variant, are dropped with a diagnostic.
pub fn join(recipients: &[Recipient], files: &FileTable) -> (Vec<MatchResult>, Vec<Diagnostic>) {
    let mut matches = Vec::new();
    let mut diagnostics = Vec::new();

    for recipient in recipients {
        let line = Some(recipient.line_number);

        if recipient.code.is_empty() || recipient.email.is_empty() {
            warn!("Line {}: skipped, code or email missing", recipient.line_number);
            diagnostics.push(Diagnostic::warning(line, "skipped: code or email missing"));
            continue;
        }

        match find_file(&recipient.code, files) {
            Some((variant, path)) => {
                debug!(
                    "✓ {} -> {} -> {} ({})",
                    recipient.name,
                    recipient.code,
                    path.display(),
                    variant.name()
                );
                matches.push(MatchResult {
                    name: recipient.name.clone(),
                    email: recipient.email.clone(),
                    file_path: path.clone(),
                    code: recipient.code.clone(),
                    variant,
                    line_number: recipient.line_number,
                });
            }
            None => {
                warn!(
                    "✗ No file for code '{}' ({})",
                    recipient.code, recipient.name
                );
                diagnostics.push(Diagnostic::warning(
                    line,
                    format!("no file for code '{}' ({})", recipient.code, recipient.name),
                ));
            }
        }
    }

    (matches, diagnostics)
}

/// Parse, clean, scan, and join. Never fails: unreadable inputs and misses
/// come back as diagnostics next to whatever matched.
pub fn match_recipients(table_path: &Path, pdf_dir: &Path) -> MatchReport {
    let mut report = MatchReport::default();

    let raw = match parse_table(table_path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Could not load recipient table: {}", e);
            report.diagnostics.push(Diagnostic::critical(e.to_string()));
            return report;
        }
    };

    let (recipients, clean_diagnostics) = clean_records(&raw);
    report.diagnostics.extend(clean_diagnostics);
    report.total_records = recipients.len();

    if recipients.is_empty() {
        warn!("No usable recipients in {}", table_path.display());
        report
            .diagnostics
            .push(Diagnostic::critical("no usable recipients in the table"));
        return report;
    }

    let files = scan_directory(pdf_dir);
    report.total_files = files.len();

    if files.is_empty() {
        warn!("No PDF found in {}", pdf_dir.display());
        report
            .diagnostics
            .push(Diagnostic::critical(format!("no PDF found in {}", pdf_dir.display())));
        return report;
    }

    let (matches, join_diagnostics) = join(&recipients, &files);
    report.matches = matches;
    report.diagnostics.extend(join_diagnostics);

    if report.matches.is_empty() {
        warn!("No recipient matched any file");
        report.diagnostics.push(Diagnostic::critical(
            "no match: check that table codes equal PDF file names, that files end in .pdf, \
             and that codes use the same format (001 vs 1)",
        ));
    }

    info!("{}", report.summary());
    report
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaner::clean_code;
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn recipient(name: &str, email: &str, code: &str) -> Recipient {
        Recipient {
            name: name.to_string(),
            email: email.to_string(),
            code: code.to_string(),
            line_number: 1,
        }
    }

    fn table(codes: &[&str]) -> FileTable {
        codes
            .iter()
            .map(|c| (c.to_string(), PathBuf::from(format!("/pdfs/{}.pdf", c))))
            .collect()
    }

    fn fixture(table_content: &str, pdfs: &[&str]) -> (TempDir, PathBuf, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let table_path = tmp.path().join("recipients.csv");
        fs::write(&table_path, table_content).unwrap();

        let pdf_dir = tmp.path().join("pdfs");
        fs::create_dir(&pdf_dir).unwrap();
        for name in pdfs {
            File::create(pdf_dir.join(name)).unwrap();
        }

        (tmp, table_path, pdf_dir)
    }

    #[test]
    fn test_candidate_keys_order() {
        let keys: Vec<String> = candidate_keys("007").into_iter().map(|(_, k)| k).collect();
        assert_eq!(keys, vec!["007", "7", "007", "007"]);

        let keys: Vec<String> = candidate_keys("12.5").into_iter().map(|(_, k)| k).collect();
        assert_eq!(keys, vec!["12.5", "12.5", "12.5", "12"]);
    }

    #[test]
    fn test_candidate_keys_skip_empty() {
        let variants: Vec<KeyVariant> = candidate_keys("000").into_iter().map(|(v, _)| v).collect();
        assert_eq!(
            variants,
            vec![KeyVariant::Exact, KeyVariant::Padded, KeyVariant::IntegerPart]
        );
    }

    #[test]
    fn test_padding_keeps_sign_in_front() {
        assert_eq!(KeyVariant::Padded.apply("7"), "007");
        assert_eq!(KeyVariant::Padded.apply("-5"), "-05");
        assert_eq!(KeyVariant::Padded.apply("+5"), "+05");
        assert_eq!(KeyVariant::Padded.apply("1234"), "1234");
        assert_eq!(KeyVariant::Padded.apply("AB"), "0AB");
    }

    #[test]
    fn test_first_hit_wins() {
        let files = table(&["007", "7"]);
        let (variant, path) = find_file("007", &files).unwrap();

        assert_eq!(variant, KeyVariant::Exact);
        assert_eq!(path, &PathBuf::from("/pdfs/007.pdf"));
    }

    #[test]
    fn test_variants_reach_other_spellings() {
        assert_eq!(find_file("007", &table(&["7"])).unwrap().0, KeyVariant::StrippedZeros);
        assert_eq!(find_file("7", &table(&["007"])).unwrap().0, KeyVariant::Padded);
        assert_eq!(find_file("AB.1", &table(&["AB"])).unwrap().0, KeyVariant::IntegerPart);
    }

    #[test]
    fn test_padding_round_trip_for_numeric_codes() {
        for n in [0u32, 1, 9, 42, 99, 100, 999, 1000, 123456] {
            let file_name = format!("{:03}", n);
            let files = table(&[file_name.as_str()]);

            for spelling in [n.to_string(), format!("{:05}", n), format!("{}.0", n)] {
                let code = clean_code(&spelling);
                assert!(
                    find_file(&code, &files).is_some(),
                    "code {} (cleaned {}) should find {}",
                    spelling,
                    code,
                    file_name
                );
            }
        }
    }

    #[test]
    fn test_join_drops_misses_with_diagnostic() {
        let recipients = vec![
            recipient("Ann", "ann@x.com", "001"),
            recipient("Zed", "zed@x.com", "099"),
            recipient("Nobody", "", "002"),
        ];

        let (matches, diagnostics) = join(&recipients, &table(&["001", "002", "9"]));

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "Ann");
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics[0].message.contains("099"));
    }

    #[test]
    fn test_many_recipients_may_share_a_file() {
        let recipients = vec![
            recipient("Ann", "ann@x.com", "001"),
            recipient("Bob", "bob@x.com", "1"),
        ];

        let (matches, _) = join(&recipients, &table(&["001"]));
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].file_path, matches[1].file_path);
    }

    #[test]
    fn test_two_column_headerless_scenario() {
        let (_tmp, table_path, pdf_dir) =
            fixture("001,alice@x.com\n2,bob@x.com", &["001.pdf", "002.pdf"]);

        let report = match_recipients(&table_path, &pdf_dir);

        assert_eq!(report.matches.len(), 2);
        assert_eq!(report.matches[0].name, "Alice");
        assert_eq!(report.matches[0].email, "alice@x.com");
        assert_eq!(report.matches[0].file_path, pdf_dir.join("001.pdf"));
        assert_eq!(report.matches[1].name, "Bob");
        assert_eq!(report.matches[1].file_path, pdf_dir.join("002.pdf"));
    }

    #[test]
    fn test_headered_french_scenario_matches_stripped_code() {
        let (_tmp, table_path, pdf_dir) =
            fixture("Nom,Email,Code\nJean Dupont, jean@x.com ,07\n", &["7.pdf"]);

        let report = match_recipients(&table_path, &pdf_dir);

        assert_eq!(report.matches.len(), 1);
        let m = &report.matches[0];
        assert_eq!(m.name, "Jean Dupont");
        assert_eq!(m.email, "jean@x.com");
        assert_eq!(m.variant, KeyVariant::StrippedZeros);
        assert_eq!(m.file_path, pdf_dir.join("7.pdf"));
    }

    #[test]
    fn test_all_variants_missing_drops_record() {
        let (_tmp, table_path, pdf_dir) =
            fixture("Zed,zed@x.com,099\nAnn,ann@x.com,1\n", &["001.pdf", "990.pdf"]);

        let report = match_recipients(&table_path, &pdf_dir);

        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].name, "Ann");
        assert!(report.matches.iter().all(|m| m.code != "099"));
    }

    #[test]
    fn test_unreadable_table_degrades_to_empty_report() {
        let tmp = TempDir::new().unwrap();
        let report = match_recipients(&tmp.path().join("missing.csv"), tmp.path());

        assert!(report.is_empty());
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].severity, crate::cleaner::Severity::Critical);
    }

    #[test]
    fn test_missing_pdf_directory_degrades_to_empty_report() {
        let (_tmp, table_path, pdf_dir) = fixture("Ann,ann@x.com,1\n", &[]);
        fs::remove_dir(&pdf_dir).unwrap();

        let report = match_recipients(&table_path, &pdf_dir);

        assert!(report.is_empty());
        assert_eq!(report.total_records, 1);
        assert_eq!(report.total_files, 0);
    }

    #[test]
    fn test_zero_matches_adds_hint() {
        let (_tmp, table_path, pdf_dir) = fixture("Ann,ann@x.com,1\n", &["500.pdf"]);

        let report = match_recipients(&table_path, &pdf_dir);

        assert!(report.is_empty());
        assert!(report
            .diagnostics
            .last()
            .map(|d| d.message.contains("001 vs 1"))
            .unwrap_or(false));
    }
}
