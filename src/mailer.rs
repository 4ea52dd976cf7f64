// ✉️ Notification email - tells each recipient where to fetch their file
// `Notifier` is the seam; `SmtpMailer` is the production implementation.

use crate::config::SmtpSettings;
use crate::db::{list_units, mark_unit_sent, record_event, Event, Link, SendingUnit};
use crate::error::{DistribError, Result as DistribResult};
use anyhow::Result;
use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub to_name: String,
    pub to_email: String,
    pub subject: String,
    pub body: String,
}

pub trait Notifier {
    fn notify(&self, notification: &Notification) -> DistribResult<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendSummary {
    pub sent: usize,
    pub failed: usize,

    /// Already sent, or without a usable link
    pub skipped: usize,
}

// ============================================================================
// SMTP
// ============================================================================

pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> DistribResult<Self> {
        let builder = if settings.use_tls {
            SmtpTransport::starttls_relay(&settings.host).map_err(mail_error)?
        } else {
            SmtpTransport::builder_dangerous(settings.host.as_str())
        };

        let mut builder = builder.port(settings.port);
        if let Some(user) = &settings.username {
            builder = builder.credentials(Credentials::new(
                user.clone(),
                settings.password.clone().unwrap_or_default(),
            ));
        }

        let from: Mailbox = settings.from.parse().map_err(mail_error)?;

        Ok(SmtpMailer {
            transport: builder.build(),
            from,
        })
    }
}

impl Notifier for SmtpMailer {
    fn notify(&self, notification: &Notification) -> DistribResult<()> {
        let address: Address = notification.to_email.parse().map_err(mail_error)?;
        let to = Mailbox::new(Some(notification.to_name.clone()), address);

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(notification.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(mail_error)?;

        self.transport.send(&message).map_err(mail_error)?;
        Ok(())
    }
}

fn mail_error<E: std::fmt::Display>(e: E) -> DistribError {
    DistribError::Mail(e.to_string())
}

// ============================================================================
// COMPOSITION & SENDING
// ============================================================================

/// Email telling a recipient where to download their file
pub fn compose(unit: &SendingUnit, link: &Link, base_url: &str) -> Notification {
    let url = format!("{}{}", base_url.trim_end_matches('/'), link.download_url());

    Notification {
        to_name: unit.name.clone(),
        to_email: unit.email.clone(),
        subject: "Votre document est disponible".to_string(),
        body: format!(
            "Bonjour {},\n\n\
             Un document vous attend. Il ne peut être téléchargé qu'une seule fois.\n\n\
             Lien : {}\n\
             Code de sécurité : {}\n\n\
             Saisissez votre adresse email et ce code sur la page du lien.\n",
            unit.name, url, link.access_code
        ),
    }
}

/// Notify every unit of a group that has not been notified yet.
///
/// A failed send is counted and logged; the remaining units are still tried.
pub fn send_group_notifications(
    conn: &Connection,
    notifier: &dyn Notifier,
    group_id: i64,
    base_url: &str,
) -> Result<SendSummary> {
    let mut summary = SendSummary::default();

    for status in list_units(conn, group_id)? {
        let unit = &status.unit;
        let link = match &status.link {
            Some(link) if !link.used && !unit.is_sent() => link,
            _ => {
                summary.skipped += 1;
                continue;
            }
        };

        let notification = compose(unit, link, base_url);
        let unit_key = unit.id.to_string();

        match notifier.notify(&notification) {
            Ok(()) => {
                mark_unit_sent(conn, unit.id, Utc::now())?;
                record_event(
                    conn,
                    Event::new("notification_sent", "unit", &unit_key, json!({ "email": unit.email }), "system"),
                );
                summary.sent += 1;
            }
            Err(e) => {
                warn!("Failed to notify {}: {}", unit.email, e);
                record_event(
                    conn,
                    Event::new(
                        "notification_failed",
                        "unit",
                        &unit_key,
                        json!({ "email": unit.email, "error": e.to_string() }),
                        "system",
                    ),
                );
                summary.failed += 1;
            }
        }
    }

    info!(
        "Group {}: {} sent, {} failed, {} skipped",
        group_id, summary.sent, summary.failed, summary.skipped
    );
    Ok(summary)
}

// ============================================================================
// TESTS
// ============================================================================
