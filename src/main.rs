// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// Use library instead of local modules
use fast_distrib::{
    import_batch, list_groups, match_recipients, open_database, send_group_notifications,
    validate_files, export_group_csv, Settings, SmtpMailer,
};

#[derive(Parser)]
#[command(name = "fast-distrib")]
#[command(about = "Match recipients to PDFs and distribute them through one-time links", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database (overrides DISTRIB_DATABASE)
    #[arg(long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Dry run: show which recipient gets which file
    Match {
        table: PathBuf,
        pdfs: PathBuf,
    },

    /// Compare table codes with file names
    Validate {
        table: PathBuf,
        pdfs: PathBuf,
    },

    /// Match, store the files and issue one-time links
    Import {
        #[arg(short, long)]
        label: String,
        table: PathBuf,
        /// Directory of PDFs or a .zip archive
        pdfs: PathBuf,
    },

    /// Email the download links of a group
    Send {
        group: i64,
    },

    /// Export a group's delivery status as CSV
    Export {
        group: i64,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List groups with their delivery counters
    Groups,

    /// Interactive dashboard
    Dashboard,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env()?;
    if let Some(database) = cli.database {
        settings.database_path = database;
    }

    match cli.command {
        Commands::Match { table, pdfs } => run_match(&table, &pdfs),
        Commands::Validate { table, pdfs } => run_validate(&table, &pdfs),
        Commands::Import { label, table, pdfs } => run_import(&settings, &label, &table, &pdfs),
        Commands::Send { group } => run_send(&settings, group),
        Commands::Export { group, output } => run_export(&settings, group, output),
        Commands::Groups => run_groups(&settings),
        Commands::Dashboard => run_ui_mode(&settings),
    }
}

fn run_match(table: &std::path::Path, pdfs: &std::path::Path) -> Result<()> {
    println!("🔗 Matching {} against {}", table.display(), pdfs.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let report = match_recipients(table, pdfs);

    for m in &report.matches {
        println!(
            "✓ {} <{}> -> {} ({})",
            m.name,
            m.email,
            m.file_path.display(),
            m.variant.name()
        );
    }
    for d in &report.diagnostics {
        println!("  {}", d);
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{}", report.summary());
    Ok(())
}

fn run_validate(table: &std::path::Path, pdfs: &std::path::Path) -> Result<()> {
    let summary = validate_files(table, pdfs)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.is_complete() {
        eprintln!("✓ Every table code has a matching file");
    } else {
        eprintln!("⚠️  {} code(s) without a file", summary.manquants.len());
    }
    Ok(())
}

fn run_import(settings: &Settings, label: &str, table: &std::path::Path, pdfs: &std::path::Path) -> Result<()> {
    println!("📦 Importing batch '{}'", label);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = open_database(&settings.database_path)?;
    let summary = import_batch(&conn, label, table, pdfs, &settings.media_root)?;

    for link in &summary.links {
        println!(
            "✓ {} <{}> {}{}  code {}",
            link.name, link.email, settings.base_url, link.download_url, link.access_code
        );
    }
    for d in &summary.diagnostics {
        println!("  {}", d);
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    match summary.group_id {
        Some(id) => {
            println!("🎉 Group {} created: {}", id, summary.summary());
            println!("   Files stored in {}", settings.group_storage_dir(id).display());
        }
        None => println!("⚠️  Nothing matched, no group created"),
    }
    Ok(())
}

fn run_send(settings: &Settings, group: i64) -> Result<()> {
    let conn = open_database(&settings.database_path)?;
    let mailer = SmtpMailer::new(&settings.smtp)?;

    println!("✉️  Sending notifications for group {}...", group);
    let summary = send_group_notifications(&conn, &mailer, group, &settings.base_url)?;
    println!(
        "✓ Sent: {}  ✗ Failed: {}  · Skipped: {}",
        summary.sent, summary.failed, summary.skipped
    );
    Ok(())
}

fn run_export(settings: &Settings, group: i64, output: Option<PathBuf>) -> Result<()> {
    let conn = open_database(&settings.database_path)?;

    let rows = match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let rows = export_group_csv(&conn, group, file)?;
            eprintln!("✓ Wrote {} rows to {}", rows, path.display());
            rows
        }
        None => export_group_csv(&conn, group, io::stdout().lock())?,
    };

    tracing::debug!("Exported {} rows for group {}", rows, group);
    Ok(())
}

fn run_groups(settings: &Settings) -> Result<()> {
    let conn = open_database(&settings.database_path)?;
    let groups = list_groups(&conn)?;

    if groups.is_empty() {
        println!("No groups yet. Run: fast-distrib import --label <label> <table> <pdfs>");
        return Ok(());
    }

    for stats in groups {
        println!(
            "#{:<4} {:<30} {}  sent {}/{}  received {}/{}",
            stats.group.id,
            stats.group.label,
            stats.group.created_at.format("%Y-%m-%d %H:%M"),
            stats.sent,
            stats.total,
            stats.received,
            stats.total
        );
    }
    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(settings: &Settings) -> Result<()> {
    let conn = open_database(&settings.database_path)?;

    let mut app = ui::App::load(&conn)?;
    ui::run_ui(&mut app, &conn)?;

    println!("\n✅ Dashboard closed");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_settings: &Settings) -> Result<()> {
    eprintln!("❌ Dashboard not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use: fast-distrib groups");
    std::process::exit(1);
}
