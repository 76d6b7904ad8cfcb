use crate::{
    dispatcher::{CallError, DispatchError},
    interface::MethodKey,
    net::codec::{self, CodecError},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fmt, io, time::Duration};
use thiserror::Error;

/// Errors raised synchronously by stub factories and skeleton constructors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("missing argument: {0}")]
    Argument(&'static str),

    #[error("not a remote interface: {0}")]
    InterfaceShape(String),

    #[error("illegal state: {0}")]
    State(&'static str),

    #[error("unable to resolve a local address for wildcard host {host}: {source}")]
    HostResolution {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Names the kind of an error as it travels on the wire.
///
/// Every method of a remote interface lists the kinds it may raise; the list must contain
/// [`TransportError::KIND`].
pub trait ErrorKind {
    const KIND: &'static str;
}

/// An application error type that a remote method may declare and raise.
///
/// The value is serialized into the reply, so the caller can recover it with
/// [`ApplicationError::downcast`].
pub trait Throwable: Serialize + DeserializeOwned + fmt::Display + Send + Sync + 'static {
    const KIND: &'static str;
}

impl<T: Throwable> ErrorKind for T {
    const KIND: &'static str = <T as Throwable>::KIND;
}

/// Any failure of the RPC machinery itself, with the underlying cause.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),

    #[error("connection closed before a reply was received")]
    NoReply,

    #[error("call timed out after {0:?}")]
    TimedOut(Duration),

    #[error("interface has no method {0}")]
    UnknownMethod(MethodKey),

    #[error("remote failure {}: {}", .0.kind, .0.message)]
    Remote(ErrorDescriptor),

    #[error("runtime setup failed: {0}")]
    Setup(#[source] Box<Error>),
}

impl ErrorKind for TransportError {
    const KIND: &'static str = "rmi.TransportError";
}

/// Kind tag and message of an error carried by an `ERR` reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: String,
    pub message: String,
    /// Serialized original of an application error.
    pub detail: Option<Vec<u8>>,
}

impl ErrorDescriptor {
    pub const FRAMING: &'static str = "rmi.FramingError";
    pub const NO_SUCH_METHOD: &'static str = "rmi.NoSuchMethodError";
    pub const ARGUMENT_MISMATCH: &'static str = "rmi.ArgumentMismatch";
    pub const SERVER: &'static str = "rmi.ServerError";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            detail: None,
        }
    }

    pub(crate) fn framing(cause: impl fmt::Display) -> Self {
        Self::new(Self::FRAMING, cause.to_string())
    }

    pub(crate) fn for_dispatch(err: &DispatchError) -> Self {
        let kind = match err {
            DispatchError::NoSuchMethod(_) => Self::NO_SUCH_METHOD,
            DispatchError::CallError(CallError::Domain(_)) => Self::ARGUMENT_MISMATCH,
            DispatchError::CallError(CallError::Range(_)) => Self::SERVER,
            DispatchError::Raised(_) => Self::SERVER,
        };
        Self::new(kind, err.to_string())
    }
}

/// A declared error raised by the remote implementation, as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {}", .0.kind, .0.message)]
pub struct ApplicationError(ErrorDescriptor);

impl ApplicationError {
    pub fn new<E: Throwable>(err: &E) -> Self {
        Self(ErrorDescriptor {
            kind: <E as Throwable>::KIND.to_owned(),
            message: err.to_string(),
            detail: codec::encode_item(err).ok(),
        })
    }

    pub fn kind(&self) -> &str {
        &self.0.kind
    }

    pub fn message(&self) -> &str {
        &self.0.message
    }

    pub fn descriptor(&self) -> &ErrorDescriptor {
        &self.0
    }

    pub fn is<E: Throwable>(&self) -> bool {
        self.0.kind == <E as Throwable>::KIND
    }

    /// Recovers the typed error the implementation raised.
    pub fn downcast<E: Throwable>(&self) -> Option<E> {
        if !self.is::<E>() {
            return None;
        }
        codec::decode_item(self.0.detail.as_deref()?).ok()
    }
}

impl From<ErrorDescriptor> for ApplicationError {
    fn from(descriptor: ErrorDescriptor) -> Self {
        Self(descriptor)
    }
}

/// The error of every remote method call.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Application(#[from] ApplicationError),
}

impl RemoteError {
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Transport(_))
    }

    pub fn as_application(&self) -> Option<&ApplicationError> {
        match self {
            RemoteError::Application(err) => Some(err),
            RemoteError::Transport(_) => None,
        }
    }

    /// Converts an error raised by an implementation into the descriptor sent to the caller.
    ///
    /// A failed nested remote call is unwrapped to the descriptor its own server sent.
    pub(crate) fn into_descriptor(self) -> ErrorDescriptor {
        match self {
            RemoteError::Application(ApplicationError(descriptor)) => descriptor,
            RemoteError::Transport(TransportError::Remote(descriptor)) => descriptor,
            RemoteError::Transport(err) => ErrorDescriptor::new(TransportError::KIND, err.to_string()),
        }
    }
}

/// Lets an implementation that builds skeletons or stubs propagate their failures with `?`.
impl From<Error> for RemoteError {
    fn from(err: Error) -> Self {
        match err {
            Error::Transport(err) => RemoteError::Transport(err),
            other => RemoteError::Transport(TransportError::Setup(Box::new(other))),
        }
    }
}

impl<E: Throwable> From<E> for RemoteError {
    fn from(err: E) -> Self {
        RemoteError::Application(ApplicationError::new(&err))
    }
}

/// A per-connection failure inside a skeleton. None of these stop the accept loop.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    #[error("malformed request: {0}")]
    Codec(#[from] CodecError),

    #[error("peer closed the connection without sending a request")]
    NoRequest,

    #[error("timed out after {0:?} waiting for a request")]
    TimedOut(Duration),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("method {0} panicked")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Overdrawn {
        balance: i64,
    }

    impl fmt::Display for Overdrawn {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "account overdrawn ({})", self.balance)
        }
    }

    impl Throwable for Overdrawn {
        const KIND: &'static str = "bank.Overdrawn";
    }

    #[test]
    fn throwable_round_trips_through_descriptor() {
        let err: RemoteError = Overdrawn { balance: -5 }.into();
        let app = err.as_application().unwrap().clone();
        assert_eq!(app.kind(), "bank.Overdrawn");
        assert_eq!(app.message(), "account overdrawn (-5)");

        let received = ApplicationError::from(RemoteError::Application(app).into_descriptor());
        assert_eq!(received.downcast::<Overdrawn>(), Some(Overdrawn { balance: -5 }));
    }

    #[test]
    fn nested_remote_failure_is_unwrapped() {
        let inner = ErrorDescriptor::new("bank.Overdrawn", "nested");
        let err = RemoteError::Transport(TransportError::Remote(inner.clone()));
        assert_eq!(err.into_descriptor(), inner);
    }

    #[test]
    fn local_transport_failure_keeps_transport_kind() {
        let err = RemoteError::Transport(TransportError::NoReply);
        let descriptor = err.into_descriptor();
        assert_eq!(descriptor.kind, TransportError::KIND);
        assert!(descriptor.detail.is_none());
    }

    #[test]
    fn kinds() {
        assert_eq!(<Overdrawn as ErrorKind>::KIND, "bank.Overdrawn");
        assert_eq!(<TransportError as ErrorKind>::KIND, "rmi.TransportError");
    }
}
