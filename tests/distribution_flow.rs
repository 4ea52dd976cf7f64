// End-to-end: import a batch, notify recipients, redeem links, export status

use fast_distrib::mailer::Notification;
use fast_distrib::{
    export_group_csv, find_link_by_token, get_unit, import_batch, list_groups, list_units,
    redeem, send_group_notifications, setup_database, DownloadOutcome, Notifier,
};
use rusqlite::Connection;
use std::cell::RefCell;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;
use zip::write::FileOptions;

#[derive(Default)]
struct Outbox {
    sent: RefCell<Vec<Notification>>,
}

impl Notifier for Outbox {
    fn notify(&self, notification: &Notification) -> fast_distrib::Result<()> {
        self.sent.borrow_mut().push(notification.clone());
        Ok(())
    }
}

fn setup() -> (TempDir, Connection) {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("liste.csv"),
        "Nom,Email,Code\nAlice Martin,alice@x.com,001\nBob,bob@x.com,2\nCarl,carl@x.com,099\n",
    )
    .unwrap();

    let pdfs = dir.path().join("pdfs");
    fs::create_dir(&pdfs).unwrap();
    fs::write(pdfs.join("001.pdf"), b"%PDF-1.4 alice").unwrap();
    fs::write(pdfs.join("002.pdf"), b"%PDF-1.4 bob").unwrap();

    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();
    (dir, conn)
}

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        zip.start_file(*name, FileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

#[test]
fn test_import_send_redeem_export() {
    let (dir, conn) = setup();
    let media = dir.path().join("media");

    // Import
    let summary = import_batch(
        &conn,
        "Bulletins mars",
        &dir.path().join("liste.csv"),
        &dir.path().join("pdfs"),
        &media,
    )
    .unwrap();

    let group_id = summary.group_id.expect("group created");
    assert_eq!(summary.total_records, 3);
    assert_eq!(summary.total_files, 2);
    assert_eq!(summary.links.len(), 2);
    assert!(summary.diagnostics.iter().any(|d| d.message.contains("099")));

    let units = list_units(&conn, group_id).unwrap();
    assert_eq!(units.len(), 2);
    for status in &units {
        assert!(Path::new(&status.unit.file_path).starts_with(&media));
        assert!(Path::new(&status.unit.file_path).exists());
    }

    // Send
    let outbox = Outbox::default();
    let sent = send_group_notifications(&conn, &outbox, group_id, "https://files.example.org").unwrap();
    assert_eq!(sent.sent, 2);
    assert_eq!(sent.failed, 0);

    let resent = send_group_notifications(&conn, &outbox, group_id, "https://files.example.org").unwrap();
    assert_eq!(resent.sent, 0);
    assert_eq!(resent.skipped, 2);
    assert_eq!(outbox.sent.borrow().len(), 2);

    // Redeem
    let alice = summary.links.iter().find(|l| l.email == "alice@x.com").unwrap();
    let token = alice.download_url.trim_start_matches("/download/").to_string();
    assert!(outbox.sent.borrow().iter().any(|n| n.body.contains(&alice.download_url)));

    let wrong = redeem(&conn, &token, "alice@x.com", "000000").unwrap();
    assert!(matches!(wrong, DownloadOutcome::Mismatch { .. }));

    match redeem(&conn, &token, " Alice@X.com ", &alice.access_code).unwrap() {
        DownloadOutcome::Granted { unit, content } => {
            assert_eq!(unit.name, "Alice Martin");
            assert_eq!(content, b"%PDF-1.4 alice");
        }
        other => panic!("expected a grant, got {:?}", other),
    }

    let again = redeem(&conn, &token, "alice@x.com", &alice.access_code).unwrap();
    assert_eq!(again, DownloadOutcome::AlreadyUsed);

    let (link, _) = find_link_by_token(&conn, &token).unwrap().unwrap();
    assert!(link.used);
    assert!(get_unit(&conn, alice.unit_id).unwrap().unwrap().received);

    // Counters and export
    let stats = &list_groups(&conn).unwrap()[0];
    assert_eq!((stats.total, stats.sent, stats.received), (2, 2, 1));

    let mut out = Vec::new();
    assert_eq!(export_group_csv(&conn, group_id, &mut out).unwrap(), 2);
    let csv = String::from_utf8(out).unwrap();
    let alice_row = csv.lines().find(|l| l.starts_with("Alice Martin")).unwrap();
    assert!(alice_row.contains(",001.pdf,yes,"));
    assert!(alice_row.ends_with(",yes"));
    let bob_row = csv.lines().find(|l| l.starts_with("Bob")).unwrap();
    assert!(bob_row.ends_with(",no,,no"));
}

#[test]
fn test_import_from_archive() {
    let (dir, conn) = setup();
    let archive = dir.path().join("bulletins.zip");
    write_zip(
        &archive,
        &[
            ("bulletins/001.pdf", b"%PDF a"),
            ("bulletins/002.pdf", b"%PDF b"),
            ("__MACOSX/bulletins/._001.pdf", b"junk"),
        ],
    );

    let summary = import_batch(
        &conn,
        "Archive",
        &dir.path().join("liste.csv"),
        &archive,
        &dir.path().join("media"),
    )
    .unwrap();

    assert_eq!(summary.total_files, 2);
    assert_eq!(summary.links.len(), 2);
}

#[test]
fn test_import_without_match_creates_no_group() {
    let (dir, conn) = setup();
    let empty = dir.path().join("empty");
    fs::create_dir(&empty).unwrap();

    let summary = import_batch(
        &conn,
        "Vide",
        &dir.path().join("liste.csv"),
        &empty,
        &dir.path().join("media"),
    )
    .unwrap();

    assert!(summary.group_id.is_none());
    assert!(summary.links.is_empty());
    assert!(list_groups(&conn).unwrap().is_empty());
}
