//! Remote method invocation over TCP.
//!
//! A remote interface is declared with [`remote_interface!`]. The server wraps an
//! implementation object in a [`Skeleton`]; clients call it through a [`Stub`], which sends
//! each call over its own connection and turns the reply back into a return value, an
//! [`ApplicationError`] declared by the method, or a [`TransportError`].

pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod interface;
mod macros;
pub mod net;
pub mod types;

pub use async_trait::async_trait;
pub use config::Config;
pub use dispatcher::Dispatcher;
pub use endpoint::Endpoint;
pub use error::{
    ApplicationError, Error, ErrorDescriptor, ErrorKind, RemoteError, ServiceError, Throwable,
    TransportError,
};
pub use interface::{InterfaceDescriptor, MethodDescriptor, MethodKey};
pub use net::{
    client::{Stub, StubHandle},
    codec::CodecError,
    server::{DefaultHooks, Skeleton, SkeletonHooks},
};
pub use types::{Decode, Encode, Transmittable, Type, Typed, Value};

/// Glue between a remote interface trait and the runtime, implemented for `dyn Trait` by
/// [`remote_interface!`].
pub trait RemoteInterface: Send + Sync + 'static {
    /// Fully qualified interface name.
    const NAME: &'static str;

    fn descriptor() -> InterfaceDescriptor;

    fn dispatcher() -> Dispatcher<Self>;
}
