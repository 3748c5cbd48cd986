//! Error types for the console host.

use std::fmt;
use std::path::PathBuf;

/// Console host errors.
#[derive(Debug)]
pub enum ConsoleError {
    /// Configuration could not be loaded or is inconsistent.
    Config { details: String },
    /// A flow document could not be read or is invalid.
    FlowLoad { path: PathBuf, details: String },
    /// The module configuration document could not be read or parsed.
    ModuleConfig { path: PathBuf, details: String },
    /// The runtime could not be assembled.
    Assembly { details: String },
    /// An input line is not `<bot> <session> <text>`.
    MalformedLine { line: String },
    /// Reading input or writing output failed.
    Io { details: String },
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "configuration error: {}", details),
            Self::FlowLoad { path, details } => {
                write!(f, "failed to load flow '{}': {}", path.display(), details)
            }
            Self::ModuleConfig { path, details } => {
                write!(
                    f,
                    "failed to load module configuration '{}': {}",
                    path.display(),
                    details
                )
            }
            Self::Assembly { details } => write!(f, "failed to assemble runtime: {}", details),
            Self::MalformedLine { line } => {
                write!(f, "expected '<bot> <session> <text>', got '{}'", line)
            }
            Self::Io { details } => write!(f, "console I/O error: {}", details),
        }
    }
}

impl std::error::Error for ConsoleError {}
