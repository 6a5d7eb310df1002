pub use anyhow::{
    anyhow,
    bail,
    ensure,
    Context,
};
pub use thiserror::Error;

/// Result type for fallible operations that produce nothing on success.
pub type EmptyResult = anyhow::Result<()>;

/// Generic result alias used by binaries and glue code.
pub type AnyResult<T> = anyhow::Result<T>;

/// Walks an error's source chain and joins every message with `: `, the way the binaries print a
/// fatal error in a single log line.
#[must_use]
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
