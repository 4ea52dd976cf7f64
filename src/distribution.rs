// 📦 Batch import - match a table to PDFs, store the files, issue links
// The matched files are copied under the media root so the batch outlives
// the staging directory it was uploaded into.

use crate::cleaner::Diagnostic;
use crate::db::{create_group, file_sha256, insert_unit, record_event, Event, SendingUnit};
use crate::error::{DistribError, Result as DistribResult};
use crate::links::issue_link;
use crate::matcher::{match_recipients, MatchResult};
use crate::scanner::has_recognized_extension;
use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Link handed back to the operator after import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedLink {
    pub unit_id: i64,
    pub name: String,
    pub email: String,
    pub code: String,
    pub download_url: String,
    pub access_code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportSummary {
    /// None when nothing matched and no group was created
    pub group_id: Option<i64>,
    pub label: String,
    pub total_records: usize,
    pub total_files: usize,
    pub links: Vec<IssuedLink>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ImportSummary {
    pub fn summary(&self) -> String {
        format!(
            "{}: {} links issued for {} recipients ({} files)",
            self.label,
            self.links.len(),
            self.total_records,
            self.total_files
        )
    }
}

/// Directory holding the stored files of one group
pub fn group_storage_dir(media_root: &Path, group_id: i64) -> PathBuf {
    media_root.join("sending_files").join(group_id.to_string())
}

// ============================================================================
// UPLOAD STAGING
// ============================================================================

/// Keep only the final path component, with unusual characters replaced
pub fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') { c } else { '_' })
        .collect();

    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Write an uploaded payload into `dir` and return its path
pub fn save_upload(bytes: &[u8], name: &str, dir: &Path) -> DistribResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(sanitize_file_name(name));
    fs::write(&path, bytes)?;
    Ok(path)
}

/// Extract the recognized files of a ZIP archive flat into `dest`.
///
/// Folder structure inside the archive is dropped; entries that would
/// escape `dest`, and macOS resource forks, are skipped.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> DistribResult<usize> {
    let archive_error = |reason: String| DistribError::Archive {
        path: archive_path.to_path_buf(),
        reason,
    };

    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| archive_error(e.to_string()))?;
    fs::create_dir_all(dest)?;

    let mut extracted = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| archive_error(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }

        let relative = match entry.enclosed_name() {
            Some(p) => p.to_path_buf(),
            None => {
                warn!("Skipping unsafe archive entry: {}", entry.name());
                continue;
            }
        };

        if relative.components().any(|c| c.as_os_str() == "__MACOSX") || !has_recognized_extension(&relative) {
            continue;
        }

        let file_name = match relative.file_name() {
            Some(n) => n.to_owned(),
            None => continue,
        };

        let mut out = File::create(dest.join(file_name))?;
        io::copy(&mut entry, &mut out)?;
        extracted += 1;
    }

    info!("Extracted {} files from {}", extracted, archive_path.display());
    Ok(extracted)
}

/// Resolve a PDF source to a directory: directories pass through, `.zip`
/// archives are extracted into `staging`.
pub fn stage_pdf_source(source: &Path, staging: &Path) -> DistribResult<PathBuf> {
    let is_zip = source
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false);

    if source.is_file() && is_zip {
        let dest = staging.join("pdfs");
        extract_archive(source, &dest)?;
        Ok(dest)
    } else {
        Ok(source.to_path_buf())
    }
}

// ============================================================================
// IMPORT
// ============================================================================

/// Match a table against a PDF directory or archive and persist the result:
/// one group, one unit and one link per matched recipient.
pub fn import_batch(
    conn: &Connection,
    label: &str,
    table_path: &Path,
    pdf_source: &Path,
    media_root: &Path,
) -> Result<ImportSummary> {
    let staging = tempfile::tempdir().context("Failed to create staging directory")?;
    let pdf_dir = stage_pdf_source(pdf_source, staging.path())?;

    let report = match_recipients(table_path, &pdf_dir);
    let mut summary = ImportSummary {
        group_id: None,
        label: label.to_string(),
        total_records: report.total_records,
        total_files: report.total_files,
        links: Vec::new(),
        diagnostics: report.diagnostics,
    };

    if report.matches.is_empty() {
        warn!("Import '{}' produced no match, no group created", label);
        return Ok(summary);
    }

    // Fail on an unusable media root before anything is written to the database
    let files_root = media_root.join("sending_files");
    fs::create_dir_all(&files_root)
        .with_context(|| format!("Failed to create {}", files_root.display()))?;

    // Group, units, links and their events land together or not at all
    let tx = conn.unchecked_transaction()?;

    let group = create_group(&tx, label)?;
    record_event(
        &tx,
        Event::new(
            "group_created",
            "group",
            &group.id.to_string(),
            json!({ "label": label, "matches": report.matches.len() }),
            "admin",
        ),
    );

    let storage = group_storage_dir(media_root, group.id);
    fs::create_dir_all(&storage)
        .with_context(|| format!("Failed to create {}", storage.display()))?;

    // Several recipients may share one source file; store it once
    let mut stored: HashMap<PathBuf, (PathBuf, String)> = HashMap::new();

    for m in &report.matches {
        match store_match(&tx, group.id, m, &storage, &mut stored) {
            Ok(link) => summary.links.push(link),
            Err(e) => {
                warn!("Line {}: could not store {}: {:#}", m.line_number, m.email, e);
                summary.diagnostics.push(Diagnostic::warning(
                    Some(m.line_number),
                    format!("not stored: {}", e),
                ));
            }
        }
    }

    if summary.links.is_empty() {
        drop(tx);
        if let Err(e) = fs::remove_dir_all(&storage) {
            warn!("Failed to remove {}: {}", storage.display(), e);
        }
        warn!("Import '{}' stored no file, group rolled back", label);
        return Ok(summary);
    }

    tx.commit()?;
    summary.group_id = Some(group.id);

    info!("{}", summary.summary());
    Ok(summary)
}

fn store_match(
    conn: &Connection,
    group_id: i64,
    m: &MatchResult,
    storage: &Path,
    stored: &mut HashMap<PathBuf, (PathBuf, String)>,
) -> Result<IssuedLink> {
    let (dest, digest) = match stored.get(&m.file_path) {
        Some(entry) => entry.clone(),
        None => {
            let file_name = m
                .file_path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| format!("{}.pdf", m.code).into());
            let dest = storage.join(file_name);
            fs::copy(&m.file_path, &dest)
                .with_context(|| format!("Failed to copy {}", m.file_path.display()))?;
            let digest = file_sha256(&dest)?;
            stored.insert(m.file_path.clone(), (dest.clone(), digest.clone()));
            (dest, digest)
        }
    };

    let mut unit = SendingUnit::new(group_id, &m.name, &m.email, &dest.to_string_lossy(), &digest);
    unit.id = insert_unit(conn, &unit)?;
    let link = issue_link(conn, unit.id)?;

    Ok(IssuedLink {
        unit_id: unit.id,
        name: unit.name,
        email: unit.email,
        code: m.code.clone(),
        download_url: link.download_url(),
        access_code: link.access_code,
    })
}

// ============================================================================
// TESTS
// ============================================================================
