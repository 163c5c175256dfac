//! Core results and error types

use thiserror::Error;

use crate::validator::ValidationError;

/// Core error type encompassing all core module errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A branch or region refers to an instruction id that is not in the body.
    #[error("dangling instruction id {0}")]
    DanglingId(u32),

    /// The same instruction id appears twice in one body.
    #[error("duplicate instruction id {0}")]
    DuplicateId(u32),

    /// Failed to read file at the specified path.
    #[error("could not read file '{path}': {source}")]
    FileRead {
        /// The path to the file that could not be read.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write file at the specified path.
    #[error("could not write file '{path}': {source}")]
    FileWrite {
        /// The path to the file that could not be written.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The instruction index is outside the body.
    #[error("instruction index {index} out of bounds (len {len})")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// Number of instructions in the body.
        len: usize,
    },

    /// The operand does not fit the opcode.
    #[error("operand mismatch for `{opcode}`: expected {expected}")]
    InvalidOperand {
        /// Opcode mnemonic.
        opcode: String,
        /// Expected operand kind.
        expected: String,
    },

    /// The module file could not be parsed or resolved.
    #[error("failed to load module '{path}': {reason}")]
    LoadFailure {
        /// The path of the module file.
        path: String,
        /// Why loading failed.
        reason: String,
    },

    /// A builder branch or region names a label that was never placed.
    #[error("unknown label `{0}`")]
    UnknownLabel(String),

    /// The method id does not address a method in the module.
    #[error("unknown method {0}")]
    UnknownMethod(String),

    /// The mnemonic does not name an opcode.
    #[error("unknown opcode `{0}`")]
    UnknownOpcode(String),

    /// Structural verification failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
