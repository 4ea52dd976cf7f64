// ✅ Validator - advisory check that table codes and file codes overlap
// Not part of the matching path; exact code comparison only.

use crate::cleaner::clean_records;
use crate::error::{DistribError, Result};
use crate::parser::parse_table;
use crate::scanner::scan_directory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// Distinct cleaned codes in the table
    pub total_csv: usize,

    /// Codes found in the PDF directory
    pub total_pdf: usize,

    /// Table codes that name a file exactly
    pub correspondances: usize,

    /// Table codes with no file of the same name, sorted
    pub manquants: Vec<String>,
}

impl ValidationSummary {
    pub fn is_complete(&self) -> bool {
        self.manquants.is_empty()
    }
}

/// Compare the cleaned table codes with the scanned file codes.
///
/// Fails only when the table is unreadable or yields no usable record.
pub fn validate_files(table_path: &Path, pdf_dir: &Path) -> Result<ValidationSummary> {
    let raw = parse_table(table_path)?;
    let (recipients, _) = clean_records(&raw);

    if recipients.is_empty() {
        return Err(DistribError::EmptyTable {
            path: table_path.to_path_buf(),
        });
    }

    let files = scan_directory(pdf_dir);

    let table_codes: BTreeSet<&str> = recipients.iter().map(|r| r.code.as_str()).collect();
    let manquants: Vec<String> = table_codes
        .iter()
        .filter(|code| !files.contains_key(**code))
        .map(|code| code.to_string())
        .collect();

    Ok(ValidationSummary {
        total_csv: table_codes.len(),
        total_pdf: files.len(),
        correspondances: table_codes.len() - manquants.len(),
        manquants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_summary_counts_exact_overlap() {
        let tmp = TempDir::new().unwrap();
        let table = tmp.path().join("t.csv");
        fs::write(&table, "Ann,ann@x.com,1\nBob,bob@x.com,2\nCid,cid@x.com,3\nDup,dup@x.com,3\n").unwrap();
        for name in ["001.pdf", "002.pdf", "900.pdf"] {
            File::create(tmp.path().join(name)).unwrap();
        }

        let summary = validate_files(&table, tmp.path()).unwrap();

        assert_eq!(summary.total_csv, 3);
        assert_eq!(summary.total_pdf, 3);
        assert_eq!(summary.correspondances, 2);
        assert_eq!(summary.manquants, vec!["003".to_string()]);
        assert!(!summary.is_complete());
    }

    #[test]
    fn test_unreadable_table_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = validate_files(&tmp.path().join("nope.csv"), tmp.path());
        assert!(matches!(result, Err(DistribError::UnreadableTable { .. })));
    }

    #[test]
    fn test_table_without_usable_rows_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let table = tmp.path().join("t.csv");
        fs::write(&table, "Nom,Email,Code\nAnn,,\n").unwrap();

        let result = validate_files(&table, tmp.path());
        assert!(matches!(result, Err(DistribError::EmptyTable { .. })));
    }
}
