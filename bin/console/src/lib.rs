//! parley console host.
//!
//! Loads flows and module configuration from disk, assembles a runtime and
//! exchanges messages over stdin/stdout, one `<bot> <session> <text>` line
//! per incoming message.

pub mod error;
pub mod loader;
pub mod sweep;
pub mod transport;
