use tracing_subscriber::EnvFilter;

/// Initializes a process-wide `tracing` subscriber for fabric binaries and
/// integration tests, honoring `RUST_LOG` and defaulting to `info`.
///
/// Idempotent: a second call (e.g. from another test in the same process)
/// is a silent no-op rather than a panic, since `tracing`'s global
/// subscriber can only be set once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn does_not_panic_when_called_more_than_once() {
        init_tracing();
        init_tracing();
    }
}
