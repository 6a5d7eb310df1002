//! Shared plumbing for the aonflow crates: logging setup and the common error vocabulary.
pub mod errors;
pub mod logging;

pub mod prelude {
    //! Re-exports most crates need.
    pub use crate::errors::*;
}
