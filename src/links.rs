// 🔐 One-time links - issuing and redeeming download links
// A link is redeemed by presenting the recipient's email and the 6-digit code.

use crate::db::{
    consume_link, find_link_by_token, insert_link, record_event, Event, Link, SendingUnit,
};
use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use std::fs;
use tracing::{error, info, warn};

/// Inclusive range of access codes (always six digits)
pub const ACCESS_CODE_MIN: u32 = 100_000;
pub const ACCESS_CODE_MAX: u32 = 999_999;

/// Outcome of a redemption attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DownloadOutcome {
    /// No link with this token
    NotFound,

    /// Link was consumed earlier and is no longer valid
    AlreadyUsed,

    /// Email or access code did not match; the link stays usable
    Mismatch { unit_name: String },

    /// Credentials matched but the stored file could not be read; the link stays usable
    Unavailable { unit_name: String },

    /// Link consumed, unit marked received; `content` is the stored file
    Granted { unit: SendingUnit, content: Vec<u8> },
}

pub fn generate_access_code() -> String {
    rand::thread_rng()
        .gen_range(ACCESS_CODE_MIN..=ACCESS_CODE_MAX)
        .to_string()
}

/// Create and persist a fresh link for a unit
pub fn issue_link(conn: &Connection, unit_id: i64) -> Result<Link> {
    let mut link = Link {
        id: 0,
        unit_id,
        token: uuid::Uuid::new_v4().to_string(),
        access_code: generate_access_code(),
        used: false,
        used_at: None,
    };
    link.id = insert_link(conn, &link)?;

    record_event(
        conn,
        Event::new(
            "link_issued",
            "unit",
            &unit_id.to_string(),
            json!({ "link_id": link.id, "token": link.token }),
            "system",
        ),
    );

    Ok(link)
}

/// Email comparison ignores case and surrounding whitespace
pub fn credentials_match(unit: &SendingUnit, link: &Link, email: &str, access_code: &str) -> bool {
    email.trim().to_lowercase() == unit.email.trim().to_lowercase()
        && access_code.trim() == link.access_code
}

/// Check credentials and consume the link on success
pub fn redeem(
    conn: &Connection,
    token: &str,
    email: &str,
    access_code: &str,
) -> Result<DownloadOutcome> {
    let (link, unit) = match find_link_by_token(conn, token)? {
        Some(found) => found,
        None => return Ok(DownloadOutcome::NotFound),
    };

    let unit_key = unit.id.to_string();

    if link.used {
        record_event(
            conn,
            Event::new("download_denied", "unit", &unit_key, json!({ "reason": "already_used" }), "recipient"),
        );
        return Ok(DownloadOutcome::AlreadyUsed);
    }

    if !credentials_match(&unit, &link, email, access_code) {
        warn!("Download refused for unit {}: credentials mismatch", unit.id);
        record_event(
            conn,
            Event::new("download_denied", "unit", &unit_key, json!({ "reason": "mismatch" }), "recipient"),
        );
        return Ok(DownloadOutcome::Mismatch {
            unit_name: unit.name,
        });
    }

    // Load the file before consuming, so a missing file does not burn the link
    let content = match fs::read(&unit.file_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Stored file unreadable for unit {} ({}): {}", unit.id, unit.file_path, e);
            record_event(
                conn,
                Event::new(
                    "download_failed",
                    "unit",
                    &unit_key,
                    json!({ "reason": "file_unreadable", "error": e.to_string() }),
                    "system",
                ),
            );
            return Ok(DownloadOutcome::Unavailable {
                unit_name: unit.name,
            });
        }
    };

    let now = Utc::now();
    if !consume_link(conn, &link, now)? {
        // Lost a race with a concurrent redemption
        return Ok(DownloadOutcome::AlreadyUsed);
    }

    info!("Download granted for unit {} ({})", unit.id, unit.email);
    record_event(
        conn,
        Event::new("download_granted", "unit", &unit_key, json!({ "link_id": link.id }), "recipient"),
    );

    Ok(DownloadOutcome::Granted {
        unit: SendingUnit {
            received: true,
            received_date: Some(now),
            ..unit
        },
        content,
    })
}
