// SPDX-License-Identifier: BSD-3-Clause

use std::fmt;
use std::io;

use log::error;

/// The failure classes visible to callers of the core, per the error handling
/// design: everything that is not `SYSTEM` is an expected business outcome
/// and is returned silently by constructors; only `SYSTEM` triggers a log at
/// the point of detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed argument: e.g. `ttl >= 255`, a malformed CIDR, an unknown
    /// feed name.
    Inval,
    /// Unknown feed, no entry for a requested operation, address not
    /// reserved.
    NoEnt,
    /// Conflicting configuration, or a duplicate PID registration in the
    /// shared sender registry.
    Duplicate,
    /// No free address remains in a subnet pool.
    PoolExhausted,
    /// A contract violation, e.g. a child closed its stdout without posting
    /// its ports.
    Logic,
    /// Any OS call failed.
    System,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inval => "INVAL",
            Self::NoEnt => "NOENT",
            Self::Duplicate => "DUPLICATE",
            Self::PoolExhausted => "POOL_EXHAUSTED",
            Self::Logic => "LOGIC",
            Self::System => "SYSTEM",
        }
    }
}

/// An error carrying one of the [`ErrorKind`]s above plus enough context
/// (feed id, PID, path, ...) for a reader of the log to identify the call
/// that failed.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        let context = context.into();
        if kind == ErrorKind::System {
            error!("{}: {context}", kind.as_str());
        }
        Self { kind, context }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn inval(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Inval, context)
    }

    pub fn noent(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoEnt, context)
    }

    pub fn duplicate(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate, context)
    }

    pub fn pool_exhausted(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::PoolExhausted, context)
    }

    pub fn logic(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Logic, context)
    }

    pub fn system(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::System, context)
    }

    /// Wraps an `io::Error` as a `SYSTEM` error, attaching `context` (the
    /// name of the call that failed) to the underlying OS message.
    pub fn system_io(context: impl fmt::Display, source: io::Error) -> Self {
        Self::new(ErrorKind::System, format!("{context}: {source}"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.context)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::system(e.to_string())
    }
}
