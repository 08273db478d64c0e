//! Shared primitives used across the web view extension crates.

use core::fmt;

/// Result alias used across the workspace.
pub type WebViewResult<T> = Result<T, WebViewError>;

/// Failure families surfaced to host code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Registry lookup miss. Callers fall through to default handling.
    ResourceNotFound,
    /// Document load error reported by the platform.
    NavigationFailed,
    /// The page threw while evaluating a script.
    ScriptEvaluation,
    /// A page-side awaitable settled as rejected.
    PromiseRejected,
    /// No loaded document can serve the request.
    ChannelUnavailable,
    InvalidInput,
    Io,
    Protocol,
    Runtime,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResourceNotFound => "resource-not-found",
            Self::NavigationFailed => "navigation-failed",
            Self::ScriptEvaluation => "script-evaluation",
            Self::PromiseRejected => "promise-rejected",
            Self::ChannelUnavailable => "channel-unavailable",
            Self::InvalidInput => "invalid-input",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Runtime => "runtime",
        }
    }
}

/// Top-level error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebViewError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
    /// Script-side stack trace, when the page supplied one.
    pub stack: Option<String>,
}

impl WebViewError {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: Option<String>) -> Self {
        self.stack = stack.filter(|value| !value.trim().is_empty());
        self
    }

    /// Builds the rejection for a page-side exception.
    pub fn from_script(code: &'static str, kind: ErrorKind, exception: ScriptException) -> Self {
        Self::new(kind, code, exception.message).with_stack(exception.stack)
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for WebViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(stack) = &self.stack {
            write!(f, "\n{stack}")?;
        }
        Ok(())
    }
}

impl std::error::Error for WebViewError {}

/// Exception details captured in the page's script context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptException {
    pub message: String,
    pub stack: Option<String>,
}

impl ScriptException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }
}
