//! The polling cycle.
//!
//! ```text
//! LOAD_ENDPOINTS ─▶ (databox) DISCOVER ─▶ (file) AUTHORIZE ─▶ PROCESS ─▶ RECORD
//! ```
//!
//! Databoxes are handled in registry order and files in discovery order.
//! One cycle finishes every RECORD before the next cycle starts.

use crate::config::{DaemonConfig, EndpointSelector};
use crate::notify::Notifier;
use chrono::Utc;
use sage_monitor::{
    build_monitor, CandidateFile, ChannelConfig, ChannelKind, DiscoveryContext, Monitor,
    ProcessedFiles,
};
use sage_schema::{compile_str, SageConfig};
use sage_store::{Databox, ExecutionRecord, ExecutionStatus, Registry};
use sage_validator::{ContentValidator, FileProcessingError, ValidationReport, ValidatorOptions};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Validation step, separable so the daemon can be driven without real files.
pub trait FileValidator {
    fn validate(
        &self,
        path: &Path,
        config: &SageConfig,
        package: &str,
    ) -> Result<ValidationReport, FileProcessingError>;
}

impl FileValidator for ContentValidator {
    fn validate(
        &self,
        path: &Path,
        config: &SageConfig,
        package: &str,
    ) -> Result<ValidationReport, FileProcessingError> {
        self.validate_package(path, config, package)
    }
}

pub type MonitorFactory = Box<dyn Fn(&ChannelConfig) -> Box<dyn Monitor>>;

/// Result of the AUTHORIZE step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Granted,
    Denied,
    /// The registry could not answer; the file is left for a later cycle.
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub endpoints: usize,
    pub skipped_endpoints: usize,
    /// Databoxes whose poll panicked.
    pub aborted_endpoints: usize,
    pub files: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errored: usize,
    pub unauthorized: usize,
    pub deferred: usize,
}

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub work_dir: PathBuf,
    pub interval: Duration,
    pub selector: Option<EndpointSelector>,
    pub max_errors_per_rule: usize,
}

impl From<&DaemonConfig> for DaemonOptions {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            interval: config.interval,
            selector: config.selector.clone(),
            max_errors_per_rule: config.max_errors_per_rule,
        }
    }
}

pub struct Daemon<R> {
    registry: R,
    notifier: Box<dyn Notifier>,
    validator: Box<dyn FileValidator>,
    monitors: MonitorFactory,
    options: DaemonOptions,
}

impl<R: Registry + ProcessedFiles> Daemon<R> {
    pub fn new(registry: R, notifier: Box<dyn Notifier>, options: DaemonOptions) -> Self {
        Self {
            registry,
            notifier,
            validator: Box::new(ContentValidator::new(ValidatorOptions {
                max_errors_per_rule: options.max_errors_per_rule,
            })),
            monitors: Box::new(build_monitor),
            options,
        }
    }

    pub fn with_validator(mut self, validator: Box<dyn FileValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_monitors(mut self, monitors: MonitorFactory) -> Self {
        self.monitors = monitors;
        self
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn into_registry(self) -> R {
        self.registry
    }

    /// Run one cycle with no way to interrupt it.
    pub fn run_once(&self) -> CycleSummary {
        self.run_cycle(&AtomicBool::new(false))
    }

    /// One interruptible cycle when `once`, otherwise [`Daemon::run_forever`].
    pub fn run(&self, once: bool, shutdown: &AtomicBool) {
        if once {
            let summary = self.run_cycle(shutdown);
            info!(?summary, "single cycle complete");
        } else {
            self.run_forever(shutdown);
        }
    }

    /// Cycle, then sleep `interval`, until `shutdown` is set.
    pub fn run_forever(&self, shutdown: &AtomicBool) {
        info!(interval_secs = self.options.interval.as_secs(), "daemon started");
        while !shutdown.load(Ordering::SeqCst) {
            let summary = self.run_cycle(shutdown);
            info!(?summary, "cycle complete");
            self.sleep(shutdown);
        }
        info!("daemon stopped");
    }

    fn sleep(&self, shutdown: &AtomicBool) {
        let deadline = Instant::now() + self.options.interval;
        while !shutdown.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    pub fn run_cycle(&self, shutdown: &AtomicBool) -> CycleSummary {
        let mut summary = CycleSummary::default();

        let endpoints = match self.registry.list_active_endpoints() {
            Ok(list) => list,
            Err(e) => {
                error!(error = %e, "cannot list databoxes, skipping cycle");
                return summary;
            }
        };

        for databox in endpoints {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            if let Some(selector) = &self.options.selector {
                if !selector.matches(databox.id, &databox.name) {
                    continue;
                }
            }
            summary.endpoints += 1;

            let mut discovered = Vec::new();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.poll_endpoint(&databox, shutdown, &mut discovered, &mut summary)
            }));
            if let Err(payload) = outcome {
                summary.aborted_endpoints += 1;
                error!(
                    databox_id = databox.id,
                    panic = %panic_message(payload.as_ref()),
                    "databox poll panicked, continuing with the next one"
                );
            }
            // Anything not handled is left for the next run; remote copies
            // are downloaded again.
            for file in &discovered {
                file.cleanup();
            }
        }

        summary
    }

    /// DISCOVER and handle one databox. Discovered files are kept in
    /// `discovered` so the caller can clean them up on any exit.
    fn poll_endpoint(
        &self,
        databox: &Databox,
        shutdown: &AtomicBool,
        discovered: &mut Vec<CandidateFile>,
        summary: &mut CycleSummary,
    ) {
        let Some(config) = load_config(databox) else {
            summary.skipped_endpoints += 1;
            return;
        };

        let monitor = (self.monitors)(&databox.channel);
        let ctx = DiscoveryContext {
            databox_id: databox.id,
            work_dir: &self.options.work_dir,
            processed: &self.registry,
        };
        *discovered = monitor.check_new_files(&ctx);
        debug!(databox_id = databox.id, count = discovered.len(), "discovered");

        for file in discovered.iter() {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            summary.files += 1;
            self.handle_file(databox, &config, file, summary);
            file.cleanup();
        }
    }

    fn handle_file(
        &self,
        databox: &Databox,
        config: &SageConfig,
        file: &CandidateFile,
        summary: &mut CycleSummary,
    ) {
        match self.authorize(databox, file) {
            Authorization::Unknown => {
                summary.deferred += 1;
                return;
            }
            Authorization::Denied => {
                summary.unauthorized += 1;
                warn!(
                    databox_id = databox.id,
                    sender = %file.sender,
                    file = %file.name,
                    "unauthorized sender, file dropped"
                );
                if file.channel == ChannelKind::Email {
                    let sent = self.notifier.send_unauthorized_reply(databox, &file.sender);
                    info!(databox_id = databox.id, sender = %file.sender, sent, "unauthorized reply attempted");
                }
            }
            Authorization::Granted => {
                let record = self.process(databox, config, file);
                if let Err(e) = self.registry.record_execution(&record) {
                    // Not marked processed, so the file is validated and
                    // recorded again on a later cycle.
                    error!(databox_id = databox.id, file = %file.name, error = %e, "failed to record execution");
                    summary.deferred += 1;
                    return;
                }
                match record.status {
                    ExecutionStatus::Success => summary.succeeded += 1,
                    ExecutionStatus::Failed => summary.failed += 1,
                    ExecutionStatus::Error => summary.errored += 1,
                }
            }
        }

        if let Err(e) = self
            .registry
            .mark_processed(databox.id, &file.processing_key)
        {
            warn!(databox_id = databox.id, file = %file.name, error = %e, "failed to mark processed");
        }
    }

    fn authorize(&self, databox: &Databox, file: &CandidateFile) -> Authorization {
        match self.registry.is_sender_authorized(&file.sender, databox.id) {
            Ok(true) => Authorization::Granted,
            Ok(false) => Authorization::Denied,
            Err(e) => {
                error!(databox_id = databox.id, sender = %file.sender, error = %e, "authorization lookup failed");
                Authorization::Unknown
            }
        }
    }

    /// Validate one file. Never fails: errors and panics become the record.
    fn process(&self, databox: &Databox, config: &SageConfig, file: &CandidateFile) -> ExecutionRecord {
        let started_at = Utc::now();
        info!(databox_id = databox.id, file = %file.name, sender = %file.sender, "validating");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.validator.validate(&file.path, config, &databox.package)
        }));

        let (status, errors, warnings, detail) = match outcome {
            Ok(Ok(report)) => {
                let status = if report.is_success() {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::Failed
                };
                let detail = serde_json::to_string(&report)
                    .map_err(|e| warn!(error = %e, "cannot serialize report"))
                    .ok();
                (status, report.errors as u64, report.warnings as u64, detail)
            }
            Ok(Err(e)) => {
                warn!(databox_id = databox.id, file = %file.name, error = %e, "file could not be validated");
                (ExecutionStatus::Error, 0, 0, Some(e.to_string()))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(databox_id = databox.id, file = %file.name, panic = %message, "validation panicked");
                (ExecutionStatus::Error, 0, 0, Some(format!("internal error: {}", message)))
            }
        };

        info!(
            databox_id = databox.id,
            file = %file.name,
            status = %status,
            errors,
            warnings,
            "validated"
        );

        ExecutionRecord {
            databox_id: databox.id,
            sender: file.sender.clone(),
            file_name: file.name.clone(),
            started_at,
            finished_at: Utc::now(),
            status,
            errors,
            warnings,
            detail,
        }
    }
}

/// Compile the databox YAML and check its bound package; `None` skips it.
fn load_config(databox: &Databox) -> Option<SageConfig> {
    let config = match compile_str(&databox.config_yaml) {
        Ok(c) => c,
        Err(e) => {
            warn!(databox_id = databox.id, error = %e, "configuration does not compile, skipping databox");
            return None;
        }
    };
    match config.package(&databox.package) {
        Some(p) if !p.catalogs.is_empty() => Some(config),
        Some(_) => {
            warn!(databox_id = databox.id, package = %databox.package, "package has no catalogs, skipping databox");
            None
        }
        None => {
            warn!(databox_id = databox.id, package = %databox.package, "unknown package, skipping databox");
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
