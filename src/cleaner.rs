// 🧹 Field Cleaner - per-field normalization of parsed recipient rows
// Pure functions; the only side channel is the Diagnostic list they return.

use crate::parser::RawRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

/// Name used when neither a name nor an email address is available
pub const DEFAULT_RECIPIENT_NAME: &str = "Utilisateur";

/// Minimum width of a numeric code after padding
pub const CODE_WIDTH: usize = 3;

const NAME_SENTINELS: &[&str] = &["", "nan", "null", "none"];

// ============================================================================
// DIAGNOSTICS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Nothing usable came out of the step
    Warning,  // A record was dropped or looks suspicious
    Info,
}

/// One entry of the diagnostic trail returned next to every result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,

    /// Source line of the record concerned, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,

    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, line: Option<usize>, message: impl Into<String>) -> Self {
        Diagnostic {
            severity,
            line,
            message: message.into(),
        }
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(Severity::Critical, None, message)
    }

    pub fn warning(line: Option<usize>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, line, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, None, message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        match self.line {
            Some(line) => write!(f, "[{}] line {}: {}", level, line, self.message),
            None => write!(f, "[{}] {}", level, self.message),
        }
    }
}

// ============================================================================
// CLEANED RECORD
// ============================================================================

/// Recipient - a cleaned row, ready to be joined against the file table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub email: String,
    pub code: String,
    pub line_number: usize,
}

// ============================================================================
// FIELD CLEANERS
// ============================================================================

/// Trim and lowercase; when the value has inner whitespace, keep the last
/// token that looks like an address.
pub fn clean_email(raw: &str) -> String {
    let email = raw.trim().to_lowercase();

    if email.split_whitespace().nth(1).is_some() {
        if let Some(token) = email.split_whitespace().rev().find(|t| looks_like_email(t)) {
            return token.to_string();
        }
    }

    email
}

/// Name from the row, falling back to the email's local part
pub fn clean_name(raw: &str, email: &str) -> String {
    let name = raw.trim();

    if NAME_SENTINELS.contains(&name.to_lowercase().as_str()) {
        if email.contains('@') {
            return name_from_email(email);
        }
        return DEFAULT_RECIPIENT_NAME.to_string();
    }

    if looks_like_email(name) {
        return name_from_email(name);
    }

    name.to_string()
}

/// Numeric codes become zero-padded to `CODE_WIDTH` ("1" → "001",
/// "7.0" → "007"); anything else is only trimmed.
pub fn clean_code(raw: &str) -> String {
    let code = raw.trim();

    if !is_numeric_code(code) {
        return code.to_string();
    }

    let integer_part = code.split('.').next().unwrap_or("");
    let digits = integer_part.trim_start_matches('0');
    let digits = if digits.is_empty() { "0" } else { digits };

    format!("{:0>width$}", digits, width = CODE_WIDTH)
}

/// Digits with at most one '.' somewhere
fn is_numeric_code(code: &str) -> bool {
    let mut dots = 0;
    let mut digits = 0;

    for c in code.chars() {
        match c {
            '.' => dots += 1,
            c if c.is_ascii_digit() => digits += 1,
            _ => return false,
        }
    }

    dots <= 1 && digits > 0
}

/// Local part of an address, capitalized. Empty when there is no '@'.
pub fn name_from_email(email: &str) -> String {
    match email.trim().split_once('@') {
        Some((local, _)) => capitalize(local),
        None => String::new(),
    }
}

/// First character uppercased, the rest lowercased
pub fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

pub fn looks_like_email(value: &str) -> bool {
    value.contains('@') && value.contains('.')
}

// ============================================================================
// RECORD CLEANING
// ============================================================================

/// Clean every record, drop rows missing an email or code, then keep the
/// first occurrence of each (email, code) pair.
pub fn clean_records(records: &[RawRecord]) -> (Vec<Recipient>, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut cleaned = Vec::with_capacity(records.len());

    for record in records {
        let line = Some(record.line_number);
        let email = clean_email(&record.email);
        let name = clean_name(&record.name, &email);
        let code = clean_code(&record.code);

        if !email.is_empty() && !looks_like_email(&email) {
            warn!("Line {}: email looks invalid: '{}'", record.line_number, email);
            diagnostics.push(Diagnostic::warning(
                line,
                format!("email looks invalid: '{}'", email),
            ));
        }

        if email.is_empty() || code.is_empty() {
            debug!("Line {}: dropped, email or code missing", record.line_number);
            diagnostics.push(Diagnostic::warning(line, "dropped: email or code missing"));
            continue;
        }

        if !seen.insert((email.clone(), code.clone())) {
            debug!("Line {}: duplicate of ({}, {})", record.line_number, email, code);
            diagnostics.push(Diagnostic::warning(
                line,
                format!("dropped: duplicate of ({}, {})", email, code),
            ));
            continue;
        }

        cleaned.push(Recipient {
            name,
            email,
            code,
            line_number: record.line_number,
        });
    }

    (cleaned, diagnostics)
}

// ============================================================================
// TESTS
// ============================================================================
