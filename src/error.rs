//! Unified error type for every stage of the runtime: parsing, checking,
//! permission enforcement, and evaluation.
//!
//! A `thiserror`-derived enum with small constructor helpers, one kind
//! per failure mode this runtime distinguishes, each carrying an optional
//! source span.

use crate::span::Span;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Syntactic or shallow-semantic rejection at parse time.
    #[error("parse error: {message}")]
    Parse { span: Option<Span>, message: String },

    /// Structural rejection found by the checker before any evaluation.
    #[error("check error: {message}")]
    Check { span: Option<Span>, message: String },

    /// Runtime capability denial.
    #[error("permission denied: '{operation}' requires {permission}")]
    Permission {
        span: Option<Span>,
        operation: String,
        permission: String,
    },

    /// Type mismatches, unknown identifiers, host-conversion failures,
    /// limiter exhaustion on total caps, and other evaluation failures.
    #[error("{kind}")]
    Runtime {
        span: Option<Span>,
        kind: RuntimeErrorKind,
    },
}

#[derive(Error, Debug, Clone)]
pub enum RuntimeErrorKind {
    #[error("undefined local variable: {0}")]
    UndefinedLocal(String),

    #[error("undefined global variable: {0}")]
    UndefinedGlobal(String),

    #[error("{function}: expected {expected}, got {actual}")]
    TypeMismatch {
        function: String,
        expected: String,
        actual: String,
    },

    #[error("{function}: expected {expected} argument{}, got {actual}", if expected == "1" { "" } else { "s" })]
    ArityMismatch {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("value is not callable")]
    NotCallable,

    #[error("division by zero")]
    DivisionByZero,

    #[error("host conversion failed: {0}")]
    HostConversion(String),

    #[error("limiter '{0}' exhausted")]
    LimiterExhausted(String),

    #[error("routine panicked: {0}")]
    RoutinePanicked(String),

    #[error("import failed: {0}")]
    ImportFailed(String),

    #[error("module hash mismatch for {0}")]
    HashMismatch(String),

    #[error("must-call failed: {0}")]
    MustFailed(String),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn parse(span: Span, message: impl Into<String>) -> Self {
        Error::Parse {
            span: Some(span),
            message: message.into(),
        }
    }

    pub fn check(span: Span, message: impl Into<String>) -> Self {
        Error::Check {
            span: Some(span),
            message: message.into(),
        }
    }

    pub fn permission(
        span: Option<Span>,
        operation: impl Into<String>,
        permission: impl Into<String>,
    ) -> Self {
        let operation = operation.into();
        let permission = permission.into();
        tracing::warn!(operation = %operation, permission = %permission, "permission denied");
        Error::Permission {
            span,
            operation,
            permission,
        }
    }

    pub fn runtime(span: Option<Span>, kind: RuntimeErrorKind) -> Self {
        Error::Runtime { span, kind }
    }

    pub fn undefined_local(span: Option<Span>, name: impl Into<String>) -> Self {
        Error::runtime(span, RuntimeErrorKind::UndefinedLocal(name.into()))
    }

    pub fn undefined_global(span: Option<Span>, name: impl Into<String>) -> Self {
        Error::runtime(span, RuntimeErrorKind::UndefinedGlobal(name.into()))
    }

    pub fn type_mismatch(
        span: Option<Span>,
        function: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Error::runtime(
            span,
            RuntimeErrorKind::TypeMismatch {
                function: function.into(),
                expected: expected.into(),
                actual: actual.into(),
            },
        )
    }

    pub fn arity_mismatch(
        span: Option<Span>,
        function: impl Into<String>,
        expected: impl Into<String>,
        actual: usize,
    ) -> Self {
        Error::runtime(
            span,
            RuntimeErrorKind::ArityMismatch {
                function: function.into(),
                expected: expected.into(),
                actual,
            },
        )
    }

    pub fn custom(span: Option<Span>, message: impl Into<String>) -> Self {
        Error::runtime(span, RuntimeErrorKind::Custom(message.into()))
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Error::Parse { span, .. } => *span,
            Error::Check { span, .. } => *span,
            Error::Permission { span, .. } => *span,
            Error::Runtime { span, .. } => *span,
        }
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, Error::Permission { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::runtime(None, RuntimeErrorKind::Custom(format!("io error: {e}")))
    }
}
