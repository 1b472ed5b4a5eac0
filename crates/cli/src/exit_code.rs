//! Process exit codes for peg
//!
//! Scripts wrapping `peg upload` branch on these values, so they stay stable
//! across releases.

use peg_core::Error;

/// Exit codes for the peg binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Every requested upload committed
    Success = 0,

    /// Unclassified failure, including partial directory uploads
    GeneralError = 1,

    /// Bad arguments, bad config file, unknown backend
    UsageError = 2,

    /// Connect failure, timeout, reset
    NetworkError = 3,

    /// Malformed bundle, or the store answered 401/403
    AuthError = 4,

    /// Local file or remote bucket missing
    NotFound = 5,

    /// The store rejected a multipart step with another status
    RequestError = 6,

    /// Interrupted by Ctrl+C
    Interrupted = 130,
}

impl ExitCode {
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Known exit code for a raw value
    pub const fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::GeneralError),
            2 => Some(Self::UsageError),
            3 => Some(Self::NetworkError),
            4 => Some(Self::AuthError),
            5 => Some(Self::NotFound),
            6 => Some(Self::RequestError),
            130 => Some(Self::Interrupted),
            _ => None,
        }
    }

    /// Exit code a library error maps to
    pub const fn from_error(err: &Error) -> Self {
        match Self::from_i32(err.exit_code()) {
            Some(code) => code,
            None => Self::GeneralError,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Success => "Upload completed successfully",
            Self::GeneralError => "General error",
            Self::UsageError => "Invalid arguments or configuration",
            Self::NetworkError => "Network error (retryable)",
            Self::AuthError => "Credential or permission failure",
            Self::NotFound => "File or bucket not found",
            Self::RequestError => "Request rejected by the object store",
            Self::Interrupted => "Operation interrupted",
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        Self::from_error(err)
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_i32())
    }
}
