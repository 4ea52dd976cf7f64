// 📤 CSV export of a group's delivery status

use crate::db::{get_group, list_units};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::io::Write;

pub const EXPORT_HEADER: [&str; 8] = [
    "name",
    "email",
    "file",
    "sent",
    "sending_date",
    "received",
    "received_date",
    "link_used",
];

fn format_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Write one row per unit of the group, in insertion order.
/// Returns the number of rows written.
pub fn export_group_csv<W: Write>(conn: &Connection, group_id: i64, writer: W) -> Result<usize> {
    if get_group(conn, group_id)?.is_none() {
        return Err(anyhow!("Unknown group {}", group_id));
    }

    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(EXPORT_HEADER)?;

    let units = list_units(conn, group_id)?;
    for status in &units {
        let unit = &status.unit;
        let link_used = status.link.as_ref().map(|l| l.used).unwrap_or(false);

        wtr.write_record([
            unit.name.as_str(),
            unit.email.as_str(),
            unit.file_name().as_str(),
            yes_no(unit.is_sent()),
            format_date(unit.sending_date).as_str(),
            yes_no(unit.received),
            format_date(unit.received_date).as_str(),
            yes_no(link_used),
        ])?;
    }

    wtr.flush()?;
    Ok(units.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{consume_link, create_group, insert_unit, mark_unit_sent, setup_database, SendingUnit};
    use crate::links::issue_link;
    use chrono::TimeZone;

    #[test]
    fn test_export_rows_reflect_status() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let group = create_group(&conn, "G").unwrap();

        let mut ann = SendingUnit::new(group.id, "Ann, Jr.", "ann@x.com", "/m/1/001.pdf", "h");
        ann.id = insert_unit(&conn, &ann).unwrap();
        let link = issue_link(&conn, ann.id).unwrap();
        let sent_at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        mark_unit_sent(&conn, ann.id, sent_at).unwrap();
        assert!(consume_link(&conn, &link, sent_at).unwrap());

        let mut bob = SendingUnit::new(group.id, "Bob", "bob@x.com", "/m/1/002.pdf", "h");
        bob.id = insert_unit(&conn, &bob).unwrap();

        let mut out = Vec::new();
        let rows = export_group_csv(&conn, group.id, &mut out).unwrap();
        assert_eq!(rows, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "name,email,file,sent,sending_date,received,received_date,link_used");
        assert!(lines[1].starts_with("\"Ann, Jr.\",ann@x.com,001.pdf,yes,2024-03-01 09:30:00,yes,"));
        assert!(lines[1].ends_with(",yes"));
        assert_eq!(lines[2], "Bob,bob@x.com,002.pdf,no,,no,,no");
    }

    #[test]
    fn test_export_unknown_group() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        assert!(export_group_csv(&conn, 42, Vec::new()).is_err());
    }
}
