use thiserror::Error;

use crate::metadata::token::Token;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! unsupported_error {
    ($msg:expr) => {
        crate::Error::Unsupported {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Unsupported {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which covers every failure this library can report.
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::Malformed`] - Corrupted PE image, metadata, `.resources` container or BAML stream
/// - [`Error::GoblinErr`] - The PE container itself could not be parsed
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of a buffer
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// ## Remapping Errors
/// - [`Error::Unsupported`] - A reference shape the remapper refuses to rewrite
/// - [`Error::TypeNotFound`] - A source type has no counterpart in the target module
/// - [`Error::TokenNotFound`] - A metadata token points at a row that does not exist
///
/// A remap that completes but leaves source assembly references behind is not an error;
/// it is reported through [`crate::remap::RemapStatus::Incomplete`].
///
/// # Examples
///
/// ```rust,no_run
/// use refremap::{Error, metadata::module::ModuleDef};
///
/// match ModuleDef::from_file("Consumer.dll".as_ref()) {
///     Ok(module) => println!("loaded {}", module.name),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed image: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The input is damaged and could not be parsed.
    ///
    /// Carries the source location where the malformation was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing.
    #[error("Out of Bound read would have occurred! - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The input uses a construct that cannot be remapped.
    ///
    /// Raised for pointer, function-pointer, pinned and multi-dimensional array references
    /// into a source assembly, for attribute constructors that are method definitions, for
    /// unrecognized operand kinds and for generic type names inside compiled markup.
    #[error("Unsupported - {file}:{line}: {message}")]
    Unsupported {
        /// Description of the construct that was rejected
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// The input is not a PE file goblin can parse.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// A type with the given full name could not be found in the target module.
    #[error("Failed to find type in target module - {0}")]
    TypeNotFound(String),

    /// A token references a metadata row that does not exist.
    #[error("Token does not reference an existing row - {0}")]
    TokenNotFound(Token),
}
