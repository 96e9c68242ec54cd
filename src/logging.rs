use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize structured logging for the process.
///
/// The level defaults to INFO and can be overridden with ADJUDEX_LOG
/// (e.g. `ADJUDEX_LOG=debug`). Safe to call more than once; later calls
/// are no-ops because the global subscriber is already set.
pub fn init_logging() {
    let level = std::env::var("ADJUDEX_LOG")
        .ok()
        .and_then(|v| v.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok(); // Ignore err if already set
}
