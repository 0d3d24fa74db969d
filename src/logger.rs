//! Centralized logging configuration for rotera-solver binaries and benches
//!
//! The library itself only emits `tracing` events. Applications decide whether and
//! how to print them; this module offers the setup used by the bundled binary.

use tracing::Level;

/// Initialize the tracing subscriber with the default configuration
///
/// Default log level: INFO (overrideable via RUST_LOG environment variable)
///
/// # Example
/// ```no_run
/// use rotera_solver::init_logger;
///
/// init_logger();
/// tracing::info!("Application started");
/// ```
///
/// # Environment Variables
/// ```bash
/// RUST_LOG=debug cargo run --bin solve_synthetic
/// RUST_LOG=rotera_solver::optimizer=trace cargo run --bin solve_synthetic
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level
///
/// # Arguments
/// * `default_level` - The default log level (overrideable via RUST_LOG)
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}
