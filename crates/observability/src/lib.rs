//! Process-wide tracing setup shared by the taskflow binaries.

/// Initialize process-wide logging.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Subscriber configuration (filters, output format).
pub mod tracing;
