//! Full polling cycles against a real store with scripted channels.

use sage_daemon::{Daemon, DaemonOptions, EndpointSelector, FileValidator, Notifier};
use sage_monitor::{
    build_monitor, CandidateFile, ChannelConfig, ChannelKind, DiscoveryContext, EmailMonitor,
    EmailSettings, FilesystemSettings, MailConnector, MailSession, Monitor, ProcessedFiles,
};
use sage_schema::SageConfig;
use sage_store::{
    BlockingStore, Databox, ExecutionRecord, ExecutionStatus, NewDatabox, Registry, StoreError,
};
use sage_validator::{FileProcessingError, ValidationReport};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tempfile::TempDir;

const CONFIG: &str = r#"
metadata: {name: ventas, description: daily sales, version: "1", author: qa}
catalogs:
  ventas:
    name: ventas
    description: sales rows
    filename: ventas.csv
    file_format: {type: CSV, delimiter: ",", header: true}
    fields:
      - {name: cantidad, type: integer}
      - {name: nombre, type: text}
      - {name: fecha, type: date}
packages:
  diario:
    name: Diario
    description: one csv per day
    file_format: {type: CSV}
    catalogs: [ventas]
"#;

struct TestEnv {
    dir: TempDir,
    store: Option<BlockingStore>,
}

impl TestEnv {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = BlockingStore::open(dir.path().join("sage.db")).unwrap();
        Self {
            dir,
            store: Some(store),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    fn store(&self) -> &BlockingStore {
        self.store.as_ref().unwrap()
    }

    fn databox(&self, name: &str, channel: ChannelConfig, yaml: &str) -> i64 {
        self.store()
            .create_databox(&NewDatabox {
                name: name.into(),
                channel,
                package: "diario".into(),
                config_yaml: yaml.into(),
            })
            .unwrap()
    }

    fn options(&self) -> DaemonOptions {
        DaemonOptions {
            work_dir: self.path("work"),
            interval: Duration::from_secs(1),
            selector: None,
            max_errors_per_rule: 10,
        }
    }

    fn daemon(&mut self, notifier: Box<dyn Notifier>) -> Daemon<BlockingStore> {
        let options = self.options();
        Daemon::new(self.store.take().unwrap(), notifier, options)
    }
}

fn filesystem(dir: &Path, sender: &str) -> ChannelConfig {
    ChannelConfig::Filesystem(FilesystemSettings {
        path: dir.to_path_buf(),
        pattern: "*.csv".into(),
        sender: Some(sender.into()),
    })
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    replies: Rc<RefCell<Vec<String>>>,
}

impl Notifier for RecordingNotifier {
    fn send_unauthorized_reply(&self, _databox: &Databox, claimed_sender: &str) -> bool {
        self.replies.borrow_mut().push(claimed_sender.to_string());
        false
    }
}

#[derive(Clone, Default)]
struct CountingValidator {
    calls: Rc<Cell<usize>>,
}

impl FileValidator for CountingValidator {
    fn validate(
        &self,
        _path: &Path,
        _config: &SageConfig,
        _package: &str,
    ) -> Result<ValidationReport, FileProcessingError> {
        self.calls.set(self.calls.get() + 1);
        Ok(ValidationReport::default())
    }
}

struct PanickingValidator;

impl FileValidator for PanickingValidator {
    fn validate(
        &self,
        _path: &Path,
        _config: &SageConfig,
        _package: &str,
    ) -> Result<ValidationReport, FileProcessingError> {
        panic!("corrupt workbook");
    }
}

/// Hands out a fixed list of deliveries, honoring the processed ledger.
struct ScriptedMonitor {
    files: Vec<CandidateFile>,
}

impl Monitor for ScriptedMonitor {
    fn describe(&self) -> String {
        "scripted".into()
    }

    fn discover(&self, ctx: &DiscoveryContext<'_>) -> sage_monitor::Result<Vec<CandidateFile>> {
        let mut out = Vec::new();
        for file in &self.files {
            if !ctx.processed.is_processed(ctx.databox_id, &file.processing_key)? {
                out.push(file.clone());
            }
        }
        Ok(out)
    }
}

// ============================================================================
// Email fixtures
// ============================================================================

#[derive(Clone, Default)]
struct FakeMailbox {
    messages: Rc<RefCell<BTreeMap<u32, Vec<u8>>>>,
    seen: Rc<RefCell<BTreeSet<u32>>>,
}

impl FakeMailbox {
    fn deliver(&self, uid: u32, from: &str) {
        let raw = format!(
            "From: {from}\r\n\
             To: sage@empresa.cl\r\n\
             Subject: ventas\r\n\
             Message-ID: <{uid}@otro.cl>\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"B\"\r\n\
             \r\n\
             --B\r\n\
             Content-Type: text/csv; name=\"ventas.csv\"\r\n\
             Content-Disposition: attachment; filename=\"ventas.csv\"\r\n\
             Content-Transfer-Encoding: base64\r\n\
             \r\n\
             Y2FudGlkYWQsbm9tYnJlLGZlY2hhCjEsQW5hLDIwMjQtMDEtMDEK\r\n\
             --B--\r\n"
        );
        self.messages.borrow_mut().insert(uid, raw.into_bytes());
    }

    fn is_seen(&self, uid: u32) -> bool {
        self.seen.borrow().contains(&uid)
    }
}

impl MailConnector for FakeMailbox {
    fn connect(&self, _settings: &EmailSettings) -> sage_monitor::Result<Box<dyn MailSession>> {
        Ok(Box::new(self.clone()))
    }
}

impl MailSession for FakeMailbox {
    fn unseen(&mut self) -> sage_monitor::Result<Vec<u32>> {
        let seen = self.seen.borrow();
        Ok(self
            .messages
            .borrow()
            .keys()
            .filter(|uid| !seen.contains(uid))
            .copied()
            .collect())
    }

    fn fetch(&mut self, uid: u32) -> sage_monitor::Result<Vec<u8>> {
        Ok(self.messages.borrow()[&uid].clone())
    }

    fn mark_seen(&mut self, uid: u32) -> sage_monitor::Result<()> {
        self.seen.borrow_mut().insert(uid);
        Ok(())
    }
}

fn email_settings() -> EmailSettings {
    EmailSettings {
        host: "imap.empresa.cl".into(),
        port: 993,
        username: "sage".into(),
        password: "secret".into(),
        mailbox: "INBOX".into(),
        use_tls: true,
    }
}

fn email_monitors(mailbox: &FakeMailbox) -> sage_daemon::MonitorFactory {
    let mailbox = mailbox.clone();
    Box::new(move |_: &ChannelConfig| {
        Box::new(EmailMonitor::with_connector(
            email_settings(),
            Box::new(mailbox.clone()),
        )) as Box<dyn Monitor>
    })
}

/// Registry whose lookups and writes can be made to fail on demand.
struct FlakyRegistry {
    store: BlockingStore,
    fail_authorization: Cell<bool>,
    fail_record: Cell<bool>,
}

impl FlakyRegistry {
    fn new(store: BlockingStore) -> Self {
        Self {
            store,
            fail_authorization: Cell::new(false),
            fail_record: Cell::new(false),
        }
    }
}

fn locked() -> StoreError {
    StoreError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "database is locked",
    ))
}

impl Registry for FlakyRegistry {
    fn list_active_endpoints(&self) -> sage_store::Result<Vec<Databox>> {
        self.store.list_active_endpoints()
    }

    fn is_sender_authorized(&self, sender: &str, databox_id: i64) -> sage_store::Result<bool> {
        if self.fail_authorization.get() {
            return Err(locked());
        }
        self.store.is_sender_authorized(sender, databox_id)
    }

    fn record_execution(&self, record: &ExecutionRecord) -> sage_store::Result<()> {
        if self.fail_record.get() {
            return Err(locked());
        }
        self.store.record_execution(record)
    }
}

impl ProcessedFiles for FlakyRegistry {
    fn is_processed(&self, databox_id: i64, key: &str) -> sage_monitor::Result<bool> {
        self.store.is_processed(databox_id, key)
    }

    fn mark_processed(&self, databox_id: i64, key: &str) -> sage_monitor::Result<()> {
        self.store.mark_processed(databox_id, key)
    }
}

// ============================================================================
// Cycles
// ============================================================================

#[test]
fn test_unauthorized_email_sender_never_reaches_validation() {
    let mut env = TestEnv::new();
    let id = env.databox("ventas", ChannelConfig::Email(email_settings()), CONFIG);
    env.store().authorize_sender(id, "bodega@empresa.cl").unwrap();

    let mailbox = FakeMailbox::default();
    mailbox.deliver(1, "Intruso <Intruso@Otro.cl>");

    let notifier = RecordingNotifier::default();
    let validator = CountingValidator::default();
    let work_dir = env.options().work_dir;
    let daemon = env
        .daemon(Box::new(notifier.clone()))
        .with_validator(Box::new(validator.clone()))
        .with_monitors(email_monitors(&mailbox));

    let summary = daemon.run_once();
    assert_eq!(summary.files, 1);
    assert_eq!(summary.unauthorized, 1);
    assert_eq!(validator.calls.get(), 0);
    assert_eq!(*notifier.replies.borrow(), vec!["intruso@otro.cl".to_string()]);

    let inbox = work_dir.join(format!("databox_{}", id));
    assert_eq!(std::fs::read_dir(&inbox).unwrap().count(), 0, "downloaded copy must be removed");

    let store = daemon.registry();
    assert!(store.list_executions(id).unwrap().is_empty());
    assert!(store.is_processed(id, "imap:<1@otro.cl>#0").unwrap());

    // Dropped for good: the next cycle neither replies nor validates, and
    // the message is finally marked read.
    let summary = daemon.run_once();
    assert_eq!(summary.files, 0);
    assert_eq!(notifier.replies.borrow().len(), 1);
    assert!(mailbox.is_seen(1));
}

#[test]
fn test_deferred_email_delivery_is_offered_again() {
    let mut env = TestEnv::new();
    let id = env.databox("ventas", ChannelConfig::Email(email_settings()), CONFIG);
    env.store().authorize_sender(id, "bodega@empresa.cl").unwrap();

    let mailbox = FakeMailbox::default();
    mailbox.deliver(5, "bodega@empresa.cl");

    let options = env.options();
    let registry = FlakyRegistry::new(env.store.take().unwrap());
    registry.fail_authorization.set(true);
    let daemon = Daemon::new(registry, Box::new(RecordingNotifier::default()), options)
        .with_monitors(email_monitors(&mailbox));

    let summary = daemon.run_once();
    assert_eq!((summary.files, summary.deferred), (1, 1));
    assert!(!mailbox.is_seen(5));

    daemon.registry().fail_authorization.set(false);
    let summary = daemon.run_once();
    assert_eq!((summary.files, summary.succeeded), (1, 1));
    assert_eq!(daemon.registry().store.list_executions(id).unwrap().len(), 1);

    assert_eq!(daemon.run_once().files, 0);
    assert!(mailbox.is_seen(5));
}

#[test]
fn test_unrecorded_execution_is_retried() {
    let mut env = TestEnv::new();
    let inbox = env.path("inbox");
    std::fs::write(inbox.join("ventas.csv"), "cantidad,nombre,fecha\n1,Ana,2024-01-01\n").unwrap();
    let id = env.databox("ventas", filesystem(&inbox, "s"), CONFIG);
    env.store().authorize_sender(id, "s").unwrap();

    let options = env.options();
    let registry = FlakyRegistry::new(env.store.take().unwrap());
    registry.fail_record.set(true);
    let daemon = Daemon::new(registry, Box::new(RecordingNotifier::default()), options);

    let summary = daemon.run_once();
    assert_eq!((summary.files, summary.deferred, summary.succeeded), (1, 1, 0));
    assert!(daemon.registry().store.list_executions(id).unwrap().is_empty());

    daemon.registry().fail_record.set(false);
    assert_eq!(daemon.run_once().succeeded, 1);
    assert_eq!(daemon.run_once().files, 0);
    assert_eq!(daemon.registry().store.list_executions(id).unwrap().len(), 1);
}

struct PanickingMonitor;

impl Monitor for PanickingMonitor {
    fn describe(&self) -> String {
        "panicking".into()
    }

    fn discover(&self, _ctx: &DiscoveryContext<'_>) -> sage_monitor::Result<Vec<CandidateFile>> {
        panic!("malformed server reply");
    }
}

#[test]
fn test_panicking_channel_does_not_stop_other_databoxes() {
    let mut env = TestEnv::new();
    let broken = env.path("broken");
    let healthy = env.path("healthy");
    std::fs::write(healthy.join("a.csv"), "cantidad,nombre,fecha\n1,a,2024-01-01\n").unwrap();
    let first = env.databox("rota", filesystem(&broken, "s"), CONFIG);
    let second = env.databox("sana", filesystem(&healthy, "s"), CONFIG);
    env.store().authorize_sender(first, "s").unwrap();
    env.store().authorize_sender(second, "s").unwrap();

    let daemon = env
        .daemon(Box::new(RecordingNotifier::default()))
        .with_monitors(Box::new(move |config: &ChannelConfig| match config {
            ChannelConfig::Filesystem(fs) if fs.path.ends_with("broken") => {
                Box::new(PanickingMonitor) as Box<dyn Monitor>
            }
            other => build_monitor(other),
        }));

    let summary = daemon.run_once();
    assert_eq!(summary.endpoints, 2);
    assert_eq!(summary.aborted_endpoints, 1);
    assert_eq!(summary.succeeded, 1);
    assert!(daemon.registry().list_executions(first).unwrap().is_empty());
    assert_eq!(daemon.registry().list_executions(second).unwrap().len(), 1);

    // The next cycle still runs.
    assert_eq!(daemon.run_once().aborted_endpoints, 1);
}

#[test]
fn test_interrupted_single_run_leaves_files_for_next_run() {
    let mut env = TestEnv::new();
    let inbox = env.path("inbox");
    let id = env.databox("ventas", filesystem(&inbox, "s"), CONFIG);
    env.store().authorize_sender(id, "s").unwrap();

    let download = env.path("work").join("1_0_ventas.csv");
    let candidate = CandidateFile {
        name: "ventas.csv".into(),
        path: download.clone(),
        sender: "s".into(),
        channel: ChannelKind::Sftp,
        processing_key: "sftp://h/ventas.csv@1:10".into(),
        metadata: BTreeMap::new(),
        temporary: true,
    };
    let daemon = env
        .daemon(Box::new(RecordingNotifier::default()))
        .with_monitors(Box::new(move |_: &ChannelConfig| {
            std::fs::write(&candidate.path, "cantidad,nombre,fecha\n").unwrap();
            Box::new(ScriptedMonitor {
                files: vec![candidate.clone()],
            }) as Box<dyn Monitor>
        }));

    daemon.run(true, &AtomicBool::new(true));
    assert!(daemon.registry().list_executions(id).unwrap().is_empty());
    assert!(!daemon.registry().is_processed(id, "sftp://h/ventas.csv@1:10").unwrap());

    daemon.run(true, &AtomicBool::new(false));
    assert_eq!(daemon.registry().list_executions(id).unwrap().len(), 1);
    assert!(!download.exists());
}

#[test]
fn test_filesystem_delivery_is_validated_and_recorded_once() {
    let mut env = TestEnv::new();
    let inbox = env.path("inbox");
    std::fs::write(
        inbox.join("ventas.csv"),
        "cantidad,nombre,fecha\n1,Ana,2024-01-01\n2,Luis,2024-01-02\ntres,Eva,2024-01-03\n",
    )
    .unwrap();
    let id = env.databox("ventas", filesystem(&inbox, "Bodega@Empresa.cl"), CONFIG);
    env.store().authorize_sender(id, "bodega@empresa.cl").unwrap();

    let daemon = env.daemon(Box::new(RecordingNotifier::default()));
    let summary = daemon.run_once();
    assert_eq!(summary.endpoints, 1);
    assert_eq!(summary.files, 1);
    assert_eq!(summary.failed, 1);

    let records = daemon.registry().list_executions(id).unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.errors, 1);
    assert_eq!(record.warnings, 0);
    assert_eq!(record.file_name, "ventas.csv");
    assert!(record.detail.as_deref().unwrap().contains("tres"));
    // Local files stay where the sender left them.
    assert!(inbox.join("ventas.csv").exists());

    assert_eq!(daemon.run_once().files, 0);
    assert_eq!(daemon.registry().list_executions(id).unwrap().len(), 1);
}

#[test]
fn test_broken_configuration_skips_only_that_databox() {
    let mut env = TestEnv::new();
    let good_inbox = env.path("good");
    let bad_inbox = env.path("bad");
    std::fs::write(good_inbox.join("a.csv"), "cantidad,nombre,fecha\n1,a,2024-01-01\n").unwrap();
    std::fs::write(bad_inbox.join("a.csv"), "cantidad,nombre,fecha\n1,a,2024-01-01\n").unwrap();

    let bad = env.databox("rota", filesystem(&bad_inbox, "s"), "catalogs: [");
    let good = env.databox("sana", filesystem(&good_inbox, "s"), CONFIG);
    env.store().authorize_sender(bad, "s").unwrap();
    env.store().authorize_sender(good, "s").unwrap();

    let daemon = env.daemon(Box::new(RecordingNotifier::default()));
    let summary = daemon.run_once();
    assert_eq!(summary.endpoints, 2);
    assert_eq!(summary.skipped_endpoints, 1);
    assert_eq!(summary.succeeded, 1);
    assert!(daemon.registry().list_executions(bad).unwrap().is_empty());
    assert_eq!(daemon.registry().list_executions(good).unwrap().len(), 1);
}

#[test]
fn test_validation_panic_is_recorded_as_error() {
    let mut env = TestEnv::new();
    let inbox = env.path("inbox");
    std::fs::write(inbox.join("a.csv"), "x").unwrap();
    std::fs::write(inbox.join("b.csv"), "y").unwrap();
    let id = env.databox("ventas", filesystem(&inbox, "s"), CONFIG);
    env.store().authorize_sender(id, "s").unwrap();

    let daemon = env
        .daemon(Box::new(RecordingNotifier::default()))
        .with_validator(Box::new(PanickingValidator));
    let summary = daemon.run_once();
    assert_eq!(summary.errored, 2);

    let records = daemon.registry().list_executions(id).unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.status, ExecutionStatus::Error);
        assert!(record.detail.as_deref().unwrap().contains("corrupt workbook"));
    }
}

#[test]
fn test_selector_limits_run_to_one_databox() {
    let mut env = TestEnv::new();
    let a = env.path("a");
    let b = env.path("b");
    std::fs::write(a.join("x.csv"), "cantidad,nombre,fecha\n").unwrap();
    std::fs::write(b.join("x.csv"), "cantidad,nombre,fecha\n").unwrap();
    let first = env.databox("primera", filesystem(&a, "s"), CONFIG);
    let second = env.databox("segunda", filesystem(&b, "s"), CONFIG);
    env.store().authorize_sender(first, "s").unwrap();
    env.store().authorize_sender(second, "s").unwrap();

    let mut options = env.options();
    options.selector = Some(EndpointSelector::Name("SEGUNDA".into()));
    let daemon = Daemon::new(
        env.store.take().unwrap(),
        Box::new(RecordingNotifier::default()),
        options,
    );
    let summary = daemon.run_once();
    assert_eq!(summary.endpoints, 1);
    assert!(daemon.registry().list_executions(first).unwrap().is_empty());
    assert_eq!(daemon.registry().list_executions(second).unwrap().len(), 1);
}
