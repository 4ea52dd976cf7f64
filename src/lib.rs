// FastDistrib - Core Library
// Recipient matching, one-time links, notifications; used by the CLI and the server

pub mod error;
pub mod config;
pub mod scanner;        // Directory Scanner: code → PDF table
pub mod parser;         // Table Parser: header sniffing, column roles
pub mod cleaner;        // Field Cleaner: email/name/code normalization
pub mod matcher;        // Joiner: key variants, first hit wins
pub mod validator;      // Advisory code overlap check
pub mod db;
pub mod links;          // One-time download links
pub mod distribution;   // Batch import: staging, storage, link issuing
pub mod mailer;
pub mod export;

// Re-export commonly used types
pub use error::{DistribError, Result};
pub use config::{Settings, SmtpSettings};
pub use scanner::{scan_directory, FileTable};
pub use parser::{parse_table, RawRecord, TableFormat, TableParser};
pub use cleaner::{clean_records, Diagnostic, Recipient, Severity};
pub use matcher::{candidate_keys, join, match_recipients, KeyVariant, MatchReport, MatchResult};
pub use validator::{validate_files, ValidationSummary};
pub use db::{
    SendingGroup, SendingUnit, Link, GroupStats, UnitStatus, Event,
    open_database, setup_database, create_group, get_group, list_groups,
    get_unit, list_units, find_link_by_token, insert_event, get_events_for_entity,
};
pub use links::{generate_access_code, issue_link, redeem, DownloadOutcome};
pub use distribution::{import_batch, save_upload, stage_pdf_source, ImportSummary, IssuedLink};
pub use mailer::{send_group_notifications, Notifier, SendSummary, SmtpMailer};
pub use export::export_group_csv;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
