use std::path::Path;
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sets up file + console logging. Mirrors the split-layer approach used
/// elsewhere in the fleet: colored, target-free output on stdout for humans,
/// plain structured lines in a daily-rotated file for the operator to grep.
pub fn init_logging(log_dir: &str, service_name: &str) -> anyhow::Result<()> {
    let _ = rotate_logs_on_startup(log_dir, service_name);
    std::fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, format!("{service_name}.log"));
    let (non_blocking_file, file_guard) = non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = non_blocking(std::io::stdout());

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_writer(non_blocking_stdout)
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    // Kept alive for the life of the process; the non-blocking writers flush
    // on drop and we never want that to happen before shutdown.
    std::mem::forget(file_guard);
    std::mem::forget(stdout_guard);

    info!("logging initialized, writing to {log_dir}/{service_name}.log");
    Ok(())
}

fn rotate_logs_on_startup(log_dir: &str, service_name: &str) -> anyhow::Result<()> {
    let log_file = format!("{log_dir}/{service_name}.log");
    let log_path = Path::new(&log_file);

    if log_path.exists() {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let backup_file = format!("{log_dir}/{service_name}.{timestamp}.log");
        std::fs::rename(&log_file, &backup_file)?;
        info!("previous log file backed up to {backup_file}");
    }

    Ok(())
}
