//! Error types for the gimbal compiler

use thiserror::Error;

/// Compiler errors
///
/// Every error aborts the current package compile: all failure causes are
/// deterministic given the same inputs, so nothing is retried and no partial
/// artifact is ever written. Each variant carries enough context (file,
/// function, symbol) to be actionable without re-running with extra
/// diagnostics.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Front-end failures (external collaborator)
    /// The native front end could not lower a source file to IR
    ///
    /// **Triggered by:** native syntax errors, a missing front-end binary,
    /// or a non-zero front-end exit status
    #[error("Front end failed for {file}: {reason}")]
    FrontEndFailure {
        /// Source file that could not be lowered
        file: String,
        /// Front-end diagnostic or launch error
        reason: String,
    },

    /// A source file has an extension that maps to no supported language
    #[error("Unrecognized source language for {file}: no convention for '{tag}'")]
    UnknownLanguage {
        /// Offending file
        file: String,
        /// The unrecognized language tag or extension
        tag: String,
    },

    // Parse errors
    /// Malformed IR text
    #[error("IR syntax error at line {line}: {message}")]
    IrSyntax {
        /// Line in the IR dump where the error occurred
        line: usize,
        /// Error description
        message: String,
    },

    /// A control transfer names a block label that no block defines
    #[error("Unresolved block label <bb {label}> in function '{function}'")]
    UnresolvedLabel {
        /// Referenced block id
        label: u32,
        /// Enclosing function
        function: String,
    },

    /// An expression references a variable with no visible declaration
    #[error("Unresolved symbol '{symbol}' in function '{function}'")]
    UnresolvedSymbol {
        /// Offending variable name
        symbol: String,
        /// Enclosing function
        function: String,
    },

    /// A function body violates a structural invariant of the block graph
    #[error("Malformed block graph in function '{function}': {message}")]
    MalformedGraph {
        /// Enclosing function
        function: String,
        /// Violated invariant
        message: String,
    },

    // Calling-convention resolution errors
    /// A declared parameter cannot be mapped onto the target signature
    #[error("Cannot map parameter '{param}' of '{function}': {reason}")]
    ConventionFailure {
        /// Function being resolved
        function: String,
        /// Offending parameter
        param: String,
        /// Why the mapping failed
        reason: String,
    },

    // Generation errors
    /// A call names a symbol absent from both the unit and the method table
    ///
    /// The runtime API surface is closed and not dynamically extensible, so
    /// this is a hard error at generation time rather than at call time.
    #[error("Unresolved callee '{symbol}' in function '{function}'")]
    UnresolvedCallee {
        /// Unknown callee name
        symbol: String,
        /// Function containing the call
        function: String,
    },

    /// An IR construct has no defined translation
    #[error("Unsupported construct in function '{function}': {construct}")]
    UnsupportedConstruct {
        /// Function containing the construct
        function: String,
        /// Description of the untranslatable construct
        construct: String,
    },

    /// Two functions would collide in the emitted artifact
    #[error("Duplicate method name '{symbol}' in compiled unit '{unit}'")]
    NameCollision {
        /// Colliding method name
        symbol: String,
        /// Unit (class) being emitted
        unit: String,
    },

    /// Invalid compile configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Artifact could not be written to the output location
    #[error("I/O error writing {path}: {reason}")]
    Io {
        /// Target path
        path: String,
        /// Underlying error text
        reason: String,
    },
}

impl Error {
    /// Create an IR syntax error with a message
    pub fn syntax(line: usize, msg: impl Into<String>) -> Self {
        Error::IrSyntax {
            line,
            message: msg.into(),
        }
    }

    /// Create an unsupported-construct error for `function`
    pub fn unsupported(function: impl Into<String>, construct: impl Into<String>) -> Self {
        Error::UnsupportedConstruct {
            function: function.into(),
            construct: construct.into(),
        }
    }
}

/// Result type for gimbal operations
pub type Result<T> = std::result::Result<T, Error>;
