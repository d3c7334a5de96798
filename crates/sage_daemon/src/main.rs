//! sage-daemon: poll databoxes and validate their deliveries.
//!
//! ```text
//! SAGE_DATABASE_URL=sqlite:/var/lib/sage/sage.db sage-daemon --interval 60
//! SAGE_DATABASE_URL=sqlite:/var/lib/sage/sage.db sage-daemon --once --casilla-id 4
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use sage_daemon::{create_notifier, Daemon, DaemonArgs, DaemonConfig, DaemonOptions};
use sage_logging::{init_logging, LogConfig};
use sage_store::BlockingStore;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

fn main() -> ExitCode {
    let args = DaemonArgs::parse();

    if let Err(e) = init_logging(LogConfig {
        app_name: "sage-daemon",
        level: args.log_level,
        log_file: args.log_file.clone(),
    }) {
        eprintln!("Failed to initialize logging: {:#}", e);
    }

    let config = match DaemonConfig::from_args(&args, |name| std::env::var(name).ok()) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            return ExitCode::from(1);
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(config: DaemonConfig) -> Result<()> {
    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("Cannot create work dir {}", config.work_dir.display()))?;

    let store = BlockingStore::connect(&config.database_url).context("Cannot open database")?;
    let daemon = Daemon::new(
        store,
        create_notifier(config.smtp.clone()),
        DaemonOptions::from(&config),
    );

    info!(work_dir = %config.work_dir.display(), "SAGE daemon starting");

    // Installed in both modes so an interrupted --once run still closes the
    // store and exits 0.
    let shutdown = match install_shutdown_handler() {
        Ok(flag) => flag,
        Err(e) => {
            daemon.into_registry().close();
            return Err(e.context("Cannot install signal handler"));
        }
    };
    daemon.run(config.once, &shutdown);

    daemon.into_registry().close();
    Ok(())
}

fn install_shutdown_handler() -> Result<Arc<AtomicBool>> {
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = shutdown_flag.clone();

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        std::thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, finishing current step...", sig);
                shutdown_flag_handler.store(true, Ordering::SeqCst);
            }
        });
    }

    #[cfg(windows)]
    {
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, finishing current step...");
            shutdown_flag_handler.store(true, Ordering::SeqCst);
        })?;
    }

    Ok(shutdown_flag)
}
