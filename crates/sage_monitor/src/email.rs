//! IMAP channel.
//!
//! Unread messages are fetched without setting `\Seen` and their pending
//! attachments are written to the databox inbox. A message is marked read
//! only once every attachment key is in the processed ledger, so a delivery
//! the daemon deferred is offered again on the next pass. A message whose
//! sender cannot be determined is left unread.

use crate::candidate::{inbox_dir, safe_file_name, CandidateFile};
use crate::config::{ChannelKind, EmailSettings};
use crate::error::{ChannelError, Result};
use crate::monitor::{DiscoveryContext, Monitor};
use mailparse::{DispositionType, MailAddr, MailHeader, MailHeaderMap, ParsedMail};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

pub trait MailSession {
    /// UIDs of unread messages in the selected mailbox.
    fn unseen(&mut self) -> Result<Vec<u32>>;
    /// Full RFC 822 message, fetched without marking it read.
    fn fetch(&mut self, uid: u32) -> Result<Vec<u8>>;
    fn mark_seen(&mut self, uid: u32) -> Result<()>;
    fn logout(&mut self) {}
}

pub trait MailConnector {
    fn connect(&self, settings: &EmailSettings) -> Result<Box<dyn MailSession>>;
}

// ============================================================================
// imap transport
// ============================================================================

pub struct ImapConnector;

struct ImapSession<T: Read + Write> {
    session: imap::Session<T>,
}

impl MailConnector for ImapConnector {
    fn connect(&self, settings: &EmailSettings) -> Result<Box<dyn MailSession>> {
        let connect_err = |message: String| ChannelError::Connect {
            channel: "imap",
            host: settings.host.clone(),
            message,
        };
        let addr = (settings.host.as_str(), settings.port);

        if settings.use_tls {
            let tls = native_tls::TlsConnector::builder()
                .build()
                .map_err(|e| connect_err(e.to_string()))?;
            let client = imap::connect(addr, &settings.host, &tls)
                .map_err(|e| connect_err(e.to_string()))?;
            login(client, settings)
        } else {
            let stream = TcpStream::connect(addr).map_err(|e| connect_err(e.to_string()))?;
            let mut client = imap::Client::new(stream);
            client
                .read_greeting()
                .map_err(|e| connect_err(e.to_string()))?;
            login(client, settings)
        }
    }
}

fn login<T: Read + Write + 'static>(
    client: imap::Client<T>,
    settings: &EmailSettings,
) -> Result<Box<dyn MailSession>> {
    let mut session = client
        .login(&settings.username, &settings.password)
        .map_err(|(e, _)| ChannelError::Auth {
            host: settings.host.clone(),
            user: settings.username.clone(),
            message: e.to_string(),
        })?;
    session
        .select(&settings.mailbox)
        .map_err(ChannelError::protocol)?;
    Ok(Box::new(ImapSession { session }))
}

impl<T: Read + Write> MailSession for ImapSession<T> {
    fn unseen(&mut self) -> Result<Vec<u32>> {
        let uids = self
            .session
            .uid_search("UNSEEN")
            .map_err(ChannelError::protocol)?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    fn fetch(&mut self, uid: u32) -> Result<Vec<u8>> {
        let fetches = self
            .session
            .uid_fetch(uid.to_string(), "BODY.PEEK[]")
            .map_err(ChannelError::protocol)?;
        fetches
            .iter()
            .find_map(|f| f.body().map(|b| b.to_vec()))
            .ok_or_else(|| ChannelError::Protocol(format!("message {} has no body", uid)))
    }

    fn mark_seen(&mut self, uid: u32) -> Result<()> {
        self.session
            .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
            .map_err(ChannelError::protocol)?;
        Ok(())
    }

    fn logout(&mut self) {
        if let Err(e) = self.session.logout() {
            debug!(error = %e, "imap logout failed");
        }
    }
}

// ============================================================================
// Message parsing
// ============================================================================

struct Attachment {
    name: String,
    body: Vec<u8>,
}

const SENDER_HEADERS: [&str; 4] = ["From", "Sender", "Reply-To", "Return-Path"];

fn find_address(text: &str) -> Option<regex::Match<'_>> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").ok())
        .as_ref()?
        .find(text)
}

fn is_address(s: &str) -> bool {
    find_address(s).is_some_and(|m| m.start() == 0 && m.end() == s.len())
}

/// Sender address of a message, lowercased.
///
/// The `From` header is parsed as an address list first. When that fails or
/// yields nothing usable, the raw sender-related headers are scanned in
/// [`SENDER_HEADERS`] order.
pub fn extract_sender(headers: &[MailHeader<'_>], raw: &[u8]) -> Option<String> {
    if let Some(from) = headers.get_first_value("From") {
        if let Ok(list) = mailparse::addrparse(&from) {
            let parsed = list.iter().find_map(|addr| match addr {
                MailAddr::Single(info) => Some(info.addr.clone()),
                MailAddr::Group(group) => group.addrs.first().map(|i| i.addr.clone()),
            });
            if let Some(addr) = parsed.map(|a| a.trim().to_lowercase()) {
                if is_address(&addr) {
                    return Some(addr);
                }
            }
        }
    }

    let lines = unfolded_lines(&header_block(raw));
    SENDER_HEADERS.iter().find_map(|name| {
        lines
            .iter()
            .filter(|l| {
                l.split_once(':')
                    .is_some_and(|(h, _)| h.trim().eq_ignore_ascii_case(name))
            })
            .find_map(|l| find_address(l))
            .map(|m| m.as_str().to_lowercase())
    })
}

fn header_block(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let end = text
        .find("\r\n\r\n")
        .or_else(|| text.find("\n\n"))
        .unwrap_or(text.len());
    text[..end].to_string()
}

fn unfolded_lines(block: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in block.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = lines.last_mut() {
                last.push(' ');
                last.push_str(line.trim());
                continue;
            }
        }
        lines.push(line.to_string());
    }
    lines
}

fn collect_attachments(part: &ParsedMail<'_>, out: &mut Vec<Attachment>) -> Result<()> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_attachments(sub, out)?;
        }
        return Ok(());
    }

    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"));
    let name = match (filename, &disposition.disposition) {
        (Some(name), _) => name.clone(),
        (None, DispositionType::Attachment) => "attachment".to_string(),
        (None, _) => return Ok(()),
    };
    let body = part.get_body_raw().map_err(ChannelError::protocol)?;
    out.push(Attachment { name, body });
    Ok(())
}

// ============================================================================
// Monitor
// ============================================================================

pub struct EmailMonitor {
    settings: EmailSettings,
    connector: Box<dyn MailConnector>,
}

impl EmailMonitor {
    pub fn new(settings: EmailSettings) -> Self {
        Self::with_connector(settings, Box::new(ImapConnector))
    }

    pub fn with_connector(settings: EmailSettings, connector: Box<dyn MailConnector>) -> Self {
        Self {
            settings,
            connector,
        }
    }

    fn take_message(
        &self,
        session: &mut dyn MailSession,
        uid: u32,
        ctx: &DiscoveryContext<'_>,
        inbox: &Path,
    ) -> Result<Vec<CandidateFile>> {
        let raw = session.fetch(uid)?;
        let parsed = mailparse::parse_mail(&raw).map_err(ChannelError::protocol)?;

        let Some(sender) = extract_sender(&parsed.headers, &raw) else {
            warn!(uid, "no sender address found, leaving message unread");
            return Ok(Vec::new());
        };

        let message_key = match parsed.headers.get_first_value("Message-ID") {
            Some(id) if !id.trim().is_empty() => format!("imap:{}", id.trim()),
            _ => format!(
                "imap://{}/{}/{}",
                self.settings.host, self.settings.mailbox, uid
            ),
        };
        let subject = parsed
            .headers
            .get_first_value("Subject")
            .unwrap_or_default();

        let mut attachments = Vec::new();
        collect_attachments(&parsed, &mut attachments)?;
        if attachments.is_empty() {
            info!(uid, sender = %sender, "message has no attachments");
        }

        let mut pending = Vec::new();
        for (index, attachment) in attachments.into_iter().enumerate() {
            let key = format!("{}#{}", message_key, index);
            if !ctx.processed.is_processed(ctx.databox_id, &key)? {
                pending.push((index, attachment, key));
            }
        }

        if pending.is_empty() {
            if let Err(e) = session.mark_seen(uid) {
                warn!(uid, error = %e, "could not mark message read");
            }
            return Ok(Vec::new());
        }

        let mut files: Vec<CandidateFile> = Vec::new();
        for (index, attachment, key) in pending {
            let local = inbox.join(format!(
                "{}_{}_{}",
                uid,
                index,
                safe_file_name(&attachment.name)
            ));
            if let Err(e) = std::fs::write(&local, &attachment.body) {
                for file in &files {
                    file.cleanup();
                }
                return Err(ChannelError::io(local, e));
            }

            let mut metadata = BTreeMap::new();
            metadata.insert("subject".to_string(), subject.clone());
            metadata.insert("uid".to_string(), uid.to_string());
            metadata.insert("mailbox".to_string(), self.settings.mailbox.clone());

            files.push(CandidateFile {
                path: local,
                name: attachment.name,
                sender: sender.clone(),
                channel: ChannelKind::Email,
                processing_key: key,
                metadata,
                temporary: true,
            });
        }

        Ok(files)
    }
}

impl Monitor for EmailMonitor {
    fn describe(&self) -> String {
        format!(
            "imap://{}@{}:{}/{}",
            self.settings.username, self.settings.host, self.settings.port, self.settings.mailbox
        )
    }

    fn discover(&self, ctx: &DiscoveryContext<'_>) -> Result<Vec<CandidateFile>> {
        let mut session = self.connector.connect(&self.settings)?;
        let uids = session.unseen()?;
        debug!(count = uids.len(), "unread messages");

        let inbox = inbox_dir(ctx.work_dir, ctx.databox_id);
        std::fs::create_dir_all(&inbox).map_err(|e| ChannelError::io(&inbox, e))?;

        let mut found = Vec::new();
        for uid in uids {
            match self.take_message(session.as_mut(), uid, ctx, &inbox) {
                Ok(mut files) => found.append(&mut files),
                Err(e) => warn!(uid, error = %e, "skipping message"),
            }
        }
        session.logout();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processed::{MemoryProcessedFiles, ProcessedFiles};
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct FakeMailbox {
        messages: Arc<Mutex<BTreeMap<u32, Vec<u8>>>>,
        seen: Arc<Mutex<BTreeSet<u32>>>,
    }

    impl MailConnector for FakeMailbox {
        fn connect(&self, _settings: &EmailSettings) -> Result<Box<dyn MailSession>> {
            Ok(Box::new(self.clone()))
        }
    }

    impl MailSession for FakeMailbox {
        fn unseen(&mut self) -> Result<Vec<u32>> {
            let seen = self.seen.lock().unwrap();
            Ok(self
                .messages
                .lock()
                .unwrap()
                .keys()
                .filter(|uid| !seen.contains(uid))
                .copied()
                .collect())
        }

        fn fetch(&mut self, uid: u32) -> Result<Vec<u8>> {
            Ok(self.messages.lock().unwrap()[&uid].clone())
        }

        fn mark_seen(&mut self, uid: u32) -> Result<()> {
            self.seen.lock().unwrap().insert(uid);
            Ok(())
        }
    }

    fn settings() -> EmailSettings {
        EmailSettings {
            host: "imap.example.cl".into(),
            port: 993,
            username: "sage".into(),
            password: "secret".into(),
            mailbox: "INBOX".into(),
            use_tls: true,
        }
    }

    fn message(from: &str, extra_headers: &str) -> Vec<u8> {
        format!(
            "From: {from}\r\n\
             To: sage@example.cl\r\n\
             Subject: Entrega enero\r\n\
             {extra_headers}\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
             \r\n\
             --XYZ\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             Adjunto la entrega.\r\n\
             --XYZ\r\n\
             Content-Type: text/csv; name=\"ventas.csv\"\r\n\
             Content-Disposition: attachment; filename=\"ventas.csv\"\r\n\
             Content-Transfer-Encoding: base64\r\n\
             \r\n\
             YSxiCjEsMgo=\r\n\
             --XYZ--\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn test_attachment_becomes_candidate_and_message_is_read_after_processing() {
        let work = TempDir::new().unwrap();
        let mailbox = FakeMailbox::default();
        mailbox.messages.lock().unwrap().insert(
            7,
            message("\"Ana Perez\" <Ana.Perez@Empresa.cl>", "Message-ID: <m1@empresa.cl>\r\n"),
        );

        let ledger = MemoryProcessedFiles::new();
        let ctx = DiscoveryContext {
            databox_id: 2,
            work_dir: work.path(),
            processed: &ledger,
        };
        let mon = EmailMonitor::with_connector(settings(), Box::new(mailbox.clone()));

        let found = mon.discover(&ctx).unwrap();
        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.name, "ventas.csv");
        assert_eq!(c.sender, "ana.perez@empresa.cl");
        assert_eq!(c.channel, ChannelKind::Email);
        assert_eq!(c.processing_key, "imap:<m1@empresa.cl>#0");
        assert_eq!(c.metadata["subject"], "Entrega enero");
        assert_eq!(std::fs::read(&c.path).unwrap(), b"a,b\n1,2\n");
        assert!(mailbox.seen.lock().unwrap().is_empty());

        // Not recorded yet: offered again.
        let again = mon.discover(&ctx).unwrap();
        assert_eq!(again.len(), 1);

        ledger.mark_processed(2, &c.processing_key).unwrap();
        assert!(mon.discover(&ctx).unwrap().is_empty());
        assert!(mailbox.seen.lock().unwrap().contains(&7));
    }

    struct FailingLedger;

    impl ProcessedFiles for FailingLedger {
        fn is_processed(&self, _databox_id: i64, _key: &str) -> Result<bool> {
            Err(ChannelError::Ledger("database is locked".into()))
        }

        fn mark_processed(&self, _databox_id: i64, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_ledger_failure_writes_nothing_and_keeps_message_unread() {
        let work = TempDir::new().unwrap();
        let mailbox = FakeMailbox::default();
        mailbox
            .messages
            .lock()
            .unwrap()
            .insert(3, message("a@b.cl", ""));
        let ctx = DiscoveryContext {
            databox_id: 2,
            work_dir: work.path(),
            processed: &FailingLedger,
        };
        let mon = EmailMonitor::with_connector(settings(), Box::new(mailbox.clone()));

        assert!(mon.discover(&ctx).unwrap().is_empty());
        assert!(mailbox.seen.lock().unwrap().is_empty());
        let inbox = inbox_dir(work.path(), 2);
        assert_eq!(std::fs::read_dir(&inbox).unwrap().count(), 0);
    }

    #[test]
    fn test_processed_attachment_is_not_downloaded_again() {
        let work = TempDir::new().unwrap();
        let mailbox = FakeMailbox::default();
        mailbox
            .messages
            .lock()
            .unwrap()
            .insert(1, message("a@b.cl", ""));
        let ledger = MemoryProcessedFiles::new();
        ledger
            .mark_processed(2, "imap://imap.example.cl/INBOX/1#0")
            .unwrap();
        let ctx = DiscoveryContext {
            databox_id: 2,
            work_dir: work.path(),
            processed: &ledger,
        };
        let mon = EmailMonitor::with_connector(settings(), Box::new(mailbox.clone()));
        assert!(mon.discover(&ctx).unwrap().is_empty());
        assert!(mailbox.seen.lock().unwrap().contains(&1));
    }

    #[test]
    fn test_message_without_sender_stays_unread() {
        let work = TempDir::new().unwrap();
        let mailbox = FakeMailbox::default();
        mailbox
            .messages
            .lock()
            .unwrap()
            .insert(4, message("Bodega Central", ""));
        let ledger = MemoryProcessedFiles::new();
        let ctx = DiscoveryContext {
            databox_id: 2,
            work_dir: work.path(),
            processed: &ledger,
        };
        let mon = EmailMonitor::with_connector(settings(), Box::new(mailbox.clone()));
        assert!(mon.discover(&ctx).unwrap().is_empty());
        assert!(mailbox.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sender_falls_back_to_header_scan() {
        let raw = b"From: Ventas <ventas at bodega>\r\nReply-To: Ventas@Bodega.cl\r\n\r\nbody";
        let parsed = mailparse::parse_mail(raw).unwrap();
        assert_eq!(
            extract_sender(&parsed.headers, raw).as_deref(),
            Some("ventas@bodega.cl")
        );
    }

    #[test]
    fn test_sender_from_folded_from_line() {
        let raw = b"Subject: x\r\nFrom: =?broken\r\n <ops@sage.cl>\r\nCc: otro@sage.cl\r\n\r\n";
        let parsed = mailparse::parse_mail(raw).unwrap();
        assert_eq!(
            extract_sender(&parsed.headers, raw).as_deref(),
            Some("ops@sage.cl")
        );
    }
}
