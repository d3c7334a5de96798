//! Best-effort replies to senders that are not authorized for a databox.

use crate::config::SmtpSettings;
use sage_store::Databox;
use tracing::{info, warn};

pub trait Notifier {
    /// Returns whether the reply went out. Never fails the caller.
    fn send_unauthorized_reply(&self, databox: &Databox, claimed_sender: &str) -> bool;
}

/// Used when SMTP is not configured: the attempt is only logged.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_unauthorized_reply(&self, databox: &Databox, claimed_sender: &str) -> bool {
        info!(
            databox_id = databox.id,
            sender = %claimed_sender,
            "unauthorized sender reply skipped: SMTP not configured"
        );
        false
    }
}

pub struct SmtpNotifier {
    settings: SmtpSettings,
}

impl SmtpNotifier {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    fn send(&self, databox: &Databox, to: &str) -> Result<(), String> {
        use lettre::{
            message::header::ContentType, transport::smtp::authentication::Credentials, Message,
            SmtpTransport, Transport,
        };

        let subject = format!("Entrega rechazada: {}", databox.name);
        let body = format!(
            "Hola,\n\n\
            Recibimos un archivo enviado desde {} para la casilla \"{}\".\n\n\
            Esta dirección no está autorizada para entregar archivos en esa casilla,\n\
            por lo que el envío no fue procesado.\n\n\
            Si cree que se trata de un error, contacte al administrador de la casilla.\n",
            to, databox.name
        );

        let email = Message::builder()
            .from(
                self.settings
                    .from
                    .parse()
                    .map_err(|e| format!("Invalid from address: {}", e))?,
            )
            .to(to
                .parse()
                .map_err(|e| format!("Invalid to address: {}", e))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| format!("Failed to build email: {}", e))?;

        let mailer = match (&self.settings.username, &self.settings.password) {
            (Some(user), Some(password)) => SmtpTransport::relay(&self.settings.host)
                .map_err(|e| format!("SMTP relay error: {}", e))?
                .credentials(Credentials::new(user.clone(), password.clone()))
                .port(self.settings.port)
                .build(),
            _ => SmtpTransport::builder_dangerous(&self.settings.host)
                .port(self.settings.port)
                .build(),
        };

        mailer
            .send(&email)
            .map_err(|e| format!("Failed to send email: {}", e))?;
        Ok(())
    }
}

impl Notifier for SmtpNotifier {
    fn send_unauthorized_reply(&self, databox: &Databox, claimed_sender: &str) -> bool {
        match self.send(databox, claimed_sender) {
            Ok(()) => {
                info!(databox_id = databox.id, sender = %claimed_sender, "unauthorized sender reply sent");
                true
            }
            Err(e) => {
                warn!(
                    databox_id = databox.id,
                    sender = %claimed_sender,
                    error = %e,
                    "unauthorized sender reply failed"
                );
                false
            }
        }
    }
}

/// SMTP when configured, log-only otherwise.
pub fn create_notifier(smtp: Option<SmtpSettings>) -> Box<dyn Notifier> {
    match smtp {
        Some(settings) => Box::new(SmtpNotifier::new(settings)),
        None => Box::new(LogNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sage_monitor::{ChannelConfig, FilesystemSettings};

    fn databox() -> Databox {
        Databox {
            id: 1,
            name: "bodega".into(),
            channel: ChannelConfig::Filesystem(FilesystemSettings {
                path: "/in".into(),
                pattern: "*".into(),
                sender: None,
            }),
            package: "p".into(),
            config_yaml: String::new(),
            active: true,
        }
    }

    #[test]
    fn test_log_notifier_reports_not_sent() {
        assert!(!LogNotifier.send_unauthorized_reply(&databox(), "x@y.cl"));
    }

    #[test]
    fn test_invalid_recipient_is_swallowed() {
        let notifier = SmtpNotifier::new(SmtpSettings {
            host: "127.0.0.1".into(),
            port: 1,
            username: None,
            password: None,
            from: "sage@example.cl".into(),
        });
        assert!(!notifier.send_unauthorized_reply(&databox(), "not an address"));
    }
}
