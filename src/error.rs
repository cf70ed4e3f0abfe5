use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a recorded failure.
///
/// Faults are reference-counted because the task that resolves an attempt and
/// the slot that records the failure for later inspection hold the same error.
pub type Fault = Arc<Error>;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Invalid connection parameters or ambient settings
    Configuration,
    /// Failure while establishing the WebSocket connection
    Connect,
    /// Failure on an established connection
    Transport,
    /// Connection closed with an abnormal close code
    Closed,
    /// An in-flight attempt was interrupted before completion
    Cancelled,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    /// Deepest error in the source chain, when any source is attached.
    pub fn root_cause(&self) -> Option<&(dyn StdError + 'static)> {
        let mut current = self.source()?;
        while let Some(next) = current.source() {
            current = next;
        }
        Some(current)
    }

    pub fn configuration<S: Into<String>>(reason: S) -> Self {
        Configuration {
            reason: reason.into(),
        }
        .into()
    }

    pub fn connect_failure<S: Into<String>>(reason: S) -> Self {
        ConnectFailure {
            reason: reason.into(),
        }
        .into()
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Cancelled.into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Invalid connection parameters or settings, detected before any attempt.
#[non_exhaustive]
#[derive(Debug)]
pub struct Configuration {
    pub reason: String,
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: {}", self.reason)
    }
}

impl StdError for Configuration {}

/// A connection attempt that did not produce an open session.
#[non_exhaustive]
#[derive(Debug)]
pub struct ConnectFailure {
    pub reason: String,
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection attempt failed: {}", self.reason)
    }
}

impl StdError for ConnectFailure {}

/// Close handshake finished with a code above normal closure.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct AbnormalClosure {
    pub code: u16,
    pub reason: String,
}

impl fmt::Display for AbnormalClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "websocket connection closed abnormally (code {}): {}",
            self.code, self.reason
        )
    }
}

impl StdError for AbnormalClosure {}

/// Operation attempted on a session that is no longer open.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct ConnectionClosed;

impl fmt::Display for ConnectionClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "websocket session is no longer open")
    }
}

impl StdError for ConnectionClosed {}

/// Attempt interrupted through [`cancel`](crate::SessionClient::cancel).
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt cancelled before completion")
    }
}

impl StdError for Cancelled {}

impl From<Configuration> for Error {
    fn from(err: Configuration) -> Self {
        Error::with_source(Kind::Configuration, err)
    }
}

impl From<ConnectFailure> for Error {
    fn from(err: ConnectFailure) -> Self {
        Error::with_source(Kind::Connect, err)
    }
}

impl From<AbnormalClosure> for Error {
    fn from(err: AbnormalClosure) -> Self {
        Error::with_source(Kind::Closed, err)
    }
}

impl From<ConnectionClosed> for Error {
    fn from(err: ConnectionClosed) -> Self {
        Error::with_source(Kind::Transport, err)
    }
}

impl From<Cancelled> for Error {
    fn from(err: Cancelled) -> Self {
        Error::with_source(Kind::Cancelled, err)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Configuration, e)
    }
}
