// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::process::ExitCode;

/// Installs the global fmt subscriber. `RUST_LOG` wins; `info` otherwise.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// Renders an error and its whole cause chain on one line.
pub fn describe(err: &anyhow::Error) -> String {
    err.chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

/// Top-level sink for fatal errors: log, write to stderr, map to a failure code.
pub fn report_fatal(err: &anyhow::Error) -> ExitCode {
    let message = describe(err);
    tracing::error!("fatal: {message}");
    eprintln!("error: {message}");
    ExitCode::FAILURE
}
