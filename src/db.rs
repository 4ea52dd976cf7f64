use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

// ============================================================================
// MODELS
// ============================================================================

/// One uploaded batch
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SendingGroup {
    pub id: i64,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

/// One recipient and the file meant for them
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SendingUnit {
    pub id: i64,
    pub group_id: i64,
    pub name: String,
    pub email: String,

    /// Stored copy of the file (under the media root)
    pub file_path: String,

    /// SHA-256 of the stored file, hex encoded
    pub file_sha256: String,

    pub received: bool,
    pub sending_date: Option<DateTime<Utc>>,
    pub received_date: Option<DateTime<Utc>>,
}

impl SendingUnit {
    /// New, not yet persisted unit (id = 0)
    pub fn new(group_id: i64, name: &str, email: &str, file_path: &str, file_sha256: &str) -> Self {
        SendingUnit {
            id: 0,
            group_id,
            name: name.to_string(),
            email: email.to_string(),
            file_path: file_path.to_string(),
            file_sha256: file_sha256.to_string(),
            received: false,
            sending_date: None,
            received_date: None,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.sending_date.is_some()
    }

    /// File name shown to the recipient on download
    pub fn file_name(&self) -> String {
        Path::new(&self.file_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "document.pdf".to_string())
    }
}

/// One-time download link for a unit
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Link {
    pub id: i64,
    pub unit_id: i64,

    /// UUID v4, the public part of the URL
    pub token: String,

    /// 6-digit code the recipient types in alongside their email
    pub access_code: String,

    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

impl Link {
    pub fn download_url(&self) -> String {
        format!("/download/{}", self.token)
    }
}

/// Group with its delivery counters
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GroupStats {
    pub group: SendingGroup,
    pub total: i64,
    pub sent: i64,
    pub received: i64,
}

/// Unit with its (latest) link
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UnitStatus {
    pub unit: SendingUnit,
    pub link: Option<Link>,
}

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// SHA-256 of a file on disk, hex encoded
pub fn file_sha256(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sending_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            label TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sending_units (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id INTEGER NOT NULL REFERENCES sending_groups(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_sha256 TEXT NOT NULL,
            received INTEGER NOT NULL DEFAULT 0,
            sending_date TEXT,
            received_date TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            unit_id INTEGER NOT NULL REFERENCES sending_units(id) ON DELETE CASCADE,
            token TEXT UNIQUE NOT NULL,
            access_code TEXT NOT NULL,
            used INTEGER NOT NULL DEFAULT 0,
            used_at TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_units_group ON sending_units(group_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_links_unit ON links(unit_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const UNIT_COLUMNS: &str =
    "u.id, u.group_id, u.name, u.email, u.file_path, u.file_sha256, u.received, u.sending_date, u.received_date";

const LINK_COLUMNS: &str = "l.id, l.unit_id, l.token, l.access_code, l.used, l.used_at";

fn unit_from_row(row: &Row, offset: usize) -> rusqlite::Result<SendingUnit> {
    Ok(SendingUnit {
        id: row.get(offset)?,
        group_id: row.get(offset + 1)?,
        name: row.get(offset + 2)?,
        email: row.get(offset + 3)?,
        file_path: row.get(offset + 4)?,
        file_sha256: row.get(offset + 5)?,
        received: row.get(offset + 6)?,
        sending_date: row.get(offset + 7)?,
        received_date: row.get(offset + 8)?,
    })
}

fn link_from_row(row: &Row, offset: usize) -> rusqlite::Result<Link> {
    Ok(Link {
        id: row.get(offset)?,
        unit_id: row.get(offset + 1)?,
        token: row.get(offset + 2)?,
        access_code: row.get(offset + 3)?,
        used: row.get(offset + 4)?,
        used_at: row.get(offset + 5)?,
    })
}

// ============================================================================
// GROUPS
// ============================================================================

pub fn create_group(conn: &Connection, label: &str) -> Result<SendingGroup> {
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO sending_groups (label, created_at) VALUES (?1, ?2)",
        params![label, created_at],
    )?;

    Ok(SendingGroup {
        id: conn.last_insert_rowid(),
        label: label.to_string(),
        created_at,
    })
}

pub fn get_group(conn: &Connection, group_id: i64) -> Result<Option<SendingGroup>> {
    let group = conn
        .query_row(
            "SELECT id, label, created_at FROM sending_groups WHERE id = ?1",
            params![group_id],
            |row| {
                Ok(SendingGroup {
                    id: row.get(0)?,
                    label: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        )
        .optional()?;

    Ok(group)
}

/// All groups, newest first, with sent/received counters
pub fn list_groups(conn: &Connection) -> Result<Vec<GroupStats>> {
    let mut stmt = conn.prepare(
        "SELECT g.id, g.label, g.created_at,
                COUNT(u.id),
                COALESCE(SUM(CASE WHEN u.sending_date IS NOT NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(u.received), 0)
         FROM sending_groups g
         LEFT JOIN sending_units u ON u.group_id = g.id
         GROUP BY g.id
         ORDER BY g.id DESC",
    )?;

    let groups = stmt
        .query_map([], |row| {
            Ok(GroupStats {
                group: SendingGroup {
                    id: row.get(0)?,
                    label: row.get(1)?,
                    created_at: row.get(2)?,
                },
                total: row.get(3)?,
                sent: row.get(4)?,
                received: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(groups)
}

// ============================================================================
// UNITS
// ============================================================================

pub fn insert_unit(conn: &Connection, unit: &SendingUnit) -> Result<i64> {
    conn.execute(
        "INSERT INTO sending_units (
            group_id, name, email, file_path, file_sha256, received, sending_date, received_date
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            unit.group_id,
            unit.name,
            unit.email,
            unit.file_path,
            unit.file_sha256,
            unit.received,
            unit.sending_date,
            unit.received_date,
        ],
    )
    .with_context(|| format!("Failed to insert unit for {}", unit.email))?;

    Ok(conn.last_insert_rowid())
}

pub fn get_unit(conn: &Connection, unit_id: i64) -> Result<Option<SendingUnit>> {
    let sql = format!("SELECT {} FROM sending_units u WHERE u.id = ?1", UNIT_COLUMNS);
    let unit = conn
        .query_row(&sql, params![unit_id], |row| unit_from_row(row, 0))
        .optional()?;

    Ok(unit)
}

/// Units of a group in insertion order, each with its most recent link
pub fn list_units(conn: &Connection, group_id: i64) -> Result<Vec<UnitStatus>> {
    let sql = format!(
        "SELECT {}, {}
         FROM sending_units u
         LEFT JOIN links l ON l.id = (
             SELECT MAX(id) FROM links WHERE unit_id = u.id
         )
         WHERE u.group_id = ?1
         ORDER BY u.id",
        UNIT_COLUMNS, LINK_COLUMNS
    );

    let mut stmt = conn.prepare(&sql)?;
    let units = stmt
        .query_map(params![group_id], |row| {
            let unit = unit_from_row(row, 0)?;
            let link_id: Option<i64> = row.get(9)?;
            let link = match link_id {
                Some(_) => Some(link_from_row(row, 9)?),
                None => None,
            };
            Ok(UnitStatus { unit, link })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(units)
}

pub fn mark_unit_sent(conn: &Connection, unit_id: i64, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE sending_units SET sending_date = ?1 WHERE id = ?2",
        params![at, unit_id],
    )?;
    Ok(())
}

// ============================================================================
// LINKS
// ============================================================================

pub fn insert_link(conn: &Connection, link: &Link) -> Result<i64> {
    conn.execute(
        "INSERT INTO links (unit_id, token, access_code, used, used_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![link.unit_id, link.token, link.access_code, link.used, link.used_at],
    )?;

    Ok(conn.last_insert_rowid())
}

/// Link and its unit for a download token
pub fn find_link_by_token(conn: &Connection, token: &str) -> Result<Option<(Link, SendingUnit)>> {
    let sql = format!(
        "SELECT {}, {}
         FROM links l
         JOIN sending_units u ON u.id = l.unit_id
         WHERE l.token = ?1",
        LINK_COLUMNS, UNIT_COLUMNS
    );

    let found = conn
        .query_row(&sql, params![token], |row| {
            Ok((link_from_row(row, 0)?, unit_from_row(row, 6)?))
        })
        .optional()?;

    Ok(found)
}

/// Mark a link used and its unit received, atomically.
///
/// Returns false (and changes nothing) when the link was already used.
pub fn consume_link(conn: &Connection, link: &Link, at: DateTime<Utc>) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;

    let changed = tx.execute(
        "UPDATE links SET used = 1, used_at = ?1 WHERE id = ?2 AND used = 0",
        params![at, link.id],
    )?;

    if changed == 0 {
        tx.rollback()?;
        return Ok(false);
    }

    tx.execute(
        "UPDATE sending_units SET received = 1, received_date = ?1 WHERE id = ?2",
        params![at, link.unit_id],
    )?;

    tx.commit()?;
    Ok(true)
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp,
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: row.get(1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).unwrap_or(serde_json::Value::Null),
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Record an event, logging instead of failing the caller
pub fn record_event(conn: &Connection, event: Event) {
    if let Err(e) = insert_event(conn, &event) {
        tracing::warn!("Failed to record {} event: {}", event.event_type, e);
    }
}

// ============================================================================
// TESTS
// ============================================================================
