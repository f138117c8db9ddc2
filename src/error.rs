use thiserror::Error;

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Each variant maps to one failure class of the devirtualization pipeline: invalid
/// configuration detected before any replay starts, malformed trace input, solver queries
/// that did not produce the model the pipeline relies on, and failures of the x86 symbolic
/// engine itself.
///
/// # Error Categories
///
/// ## Setup Errors
/// - [`Error::Configuration`] - Missing trace path, invalid symbol width, incomplete branch target
///
/// ## Input Errors
/// - [`Error::TraceFormat`] - A trace line could not be parsed
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// ## Analysis Errors
/// - [`Error::SolverInconclusive`] - No model where one was required (e.g. predicate capture)
/// - [`Error::X86Error`] - Undecodable or unsupported x86 input
/// - [`Error::UnboundVariable`] - A formula references a variable without a concrete seed
/// - [`Error::Engine`] - Misuse of the symbolic engine API
///
/// # Examples
///
/// ```rust,no_run
/// use vmscope::{DevirtConfig, DevirtOptions, Error};
///
/// let options = DevirtOptions {
///     trace1: None,
///     symbol_size: Some(4),
///     ..DevirtOptions::default()
/// };
///
/// match DevirtConfig::from_options(options) {
///     Ok(_) => println!("ready"),
///     Err(Error::Configuration(reason)) => eprintln!("bad options: {reason}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The analysis was configured inconsistently.
    ///
    /// Raised before any trace is opened: a missing first trace, a symbol width outside
    /// of {1, 2, 4, 8}, or a second trace without a complete virtual-branch target.
    #[error("Invalid configuration - {0}")]
    Configuration(String),

    /// A trace line could not be parsed into its expected fields.
    ///
    /// # Fields
    ///
    /// * `line` - 1-based line number inside the trace file
    /// * `message` - What was wrong with the line
    #[error("Malformed trace - line {line}: {message}")]
    TraceFormat {
        /// The 1-based line number of the offending line
        line: usize,
        /// Description of the parse failure
        message: String,
    },

    /// A solver query returned UNSAT or UNKNOWN where a model was required.
    #[error("Solver inconclusive - {0}")]
    SolverInconclusive(String),

    /// Decoding or executing x86 code failed.
    #[error("{0}")]
    X86Error(String),

    /// A formula was evaluated while one of its variables has no concrete seed.
    #[error("Symbolic variable SymVar_{0} has no concrete value")]
    UnboundVariable(usize),

    /// The symbolic engine was used in a way it does not support.
    #[error("{0}")]
    Engine(String),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}
