use super::{codec, server::Skeleton, Reply, Request};
use crate::{
    config::Config,
    endpoint::Endpoint,
    error::{ApplicationError, Error, ErrorKind, RemoteError, TransportError},
    interface::{InterfaceDescriptor, MethodKey},
    net::codec::CodecError,
    types::{Decode, Encode, Type, TypeMismatch, Typed, Value},
    RemoteInterface,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::{
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::Arc,
};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

/// The untyped part of a stub: which interface it speaks and where its skeleton lives.
///
/// Two handles are equal iff their interfaces and endpoints are equal. The configuration does
/// not take part in identity.
#[derive(Debug, Clone)]
pub struct StubHandle {
    interface: Arc<InterfaceDescriptor>,
    endpoint: Endpoint,
    config: Config,
}

impl StubHandle {
    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.interface
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Performs one remote call over a fresh connection.
    ///
    /// An `ERR` reply becomes an [`ApplicationError`] only when its kind is declared by the
    /// method and is not the transport kind; everything else is a [`TransportError`].
    pub async fn invoke(
        &self,
        selector: &str,
        param_types: Vec<Type>,
        args: Vec<Value>,
    ) -> Result<Value, RemoteError> {
        let method = self
            .interface
            .find(selector, &param_types)
            .ok_or_else(|| TransportError::UnknownMethod(MethodKey::new(selector, param_types.clone())))?;
        let request = Request {
            selector: selector.to_owned(),
            param_types,
            args,
        };

        debug!("invoking {} on {}", method.key, self.endpoint);
        let exchange = self.exchange(&request);
        let reply = match self.config.timeout() {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| TransportError::TimedOut(limit))??,
            None => exchange.await?,
        };

        match reply {
            Reply::Ok(value) => Ok(value),
            Reply::Err(descriptor)
                if descriptor.kind != TransportError::KIND && method.declares(&descriptor.kind) =>
            {
                Err(ApplicationError::from(descriptor).into())
            }
            Reply::Err(descriptor) => Err(TransportError::Remote(descriptor).into()),
        }
    }

    async fn exchange(&self, request: &Request) -> Result<Reply, TransportError> {
        let max = self.config.max_frame_length();
        let payload = codec::encode_request(request, max)?;

        let sock = TcpStream::connect((self.endpoint.host(), self.endpoint.port())).await?;
        let mut sock = Framed::new(sock, codec::frame_codec(max));
        sock.send(Bytes::from(payload)).await?;
        let frame = sock.next().await.ok_or(TransportError::NoReply)??;
        Ok(codec::decode_reply(&frame, max)?)
    }
}

impl PartialEq for StubHandle {
    fn eq(&self, other: &Self) -> bool {
        self.interface == other.interface && self.endpoint == other.endpoint
    }
}

impl Eq for StubHandle {}

impl Hash for StubHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.interface.hash(state);
        self.endpoint.hash(state);
    }
}

impl fmt::Display for StubHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Remote interface: {}; host&port: {}",
            self.interface, self.endpoint
        )
    }
}

/// A client-side proxy for the remote interface `I`, normally `dyn SomeTrait`.
///
/// [`remote_interface!`](crate::remote_interface) implements the interface trait for
/// `Stub<dyn Trait>`: every method call opens a connection to the skeleton, sends the request
/// and waits for its reply. A stub holds no connection between calls.
pub struct Stub<I: ?Sized> {
    handle: StubHandle,
    _interface: PhantomData<fn() -> Box<I>>,
}

fn validated<I: RemoteInterface + ?Sized>() -> Result<Arc<InterfaceDescriptor>, Error> {
    let interface = I::descriptor();
    interface.validate()?;
    Ok(Arc::new(interface))
}

impl<I: RemoteInterface + ?Sized> Stub<I> {
    /// Creates a stub for a skeleton known only by its address.
    pub fn create(endpoint: Endpoint) -> Result<Self, Error> {
        Self::create_with_config(endpoint, Config::default())
    }

    pub fn create_with_config(endpoint: Endpoint, config: Config) -> Result<Self, Error> {
        if endpoint.host().is_empty() {
            return Err(Error::Argument("endpoint host"));
        }
        let interface = validated::<I>()?;
        Ok(Self::from_handle(StubHandle {
            interface,
            endpoint,
            config,
        }))
    }

    /// Creates a stub addressing `skeleton`.
    ///
    /// The skeleton must have been created with a fixed port or already started. A wildcard
    /// host is replaced with a local address.
    pub fn from_skeleton(skeleton: &Skeleton<I>) -> Result<Self, Error> {
        let interface = validated::<I>()?;
        let endpoint = skeleton
            .address()
            .filter(Endpoint::has_port)
            .ok_or(Error::State(
                "skeleton has no address: it was created without one and has not been started",
            ))?
            .resolve_local()?;
        Ok(Self::from_handle(StubHandle {
            interface,
            endpoint,
            config: *skeleton.config(),
        }))
    }

    /// Creates a stub for the port of `skeleton` at an externally known `hostname`.
    pub fn from_skeleton_with_host(skeleton: &Skeleton<I>, hostname: &str) -> Result<Self, Error> {
        if hostname.is_empty() {
            return Err(Error::Argument("hostname"));
        }
        let interface = validated::<I>()?;
        let port = skeleton
            .address()
            .filter(Endpoint::has_port)
            .ok_or(Error::State("no port has been assigned to the skeleton"))?
            .port();
        Ok(Self::from_handle(StubHandle {
            interface,
            endpoint: Endpoint::new(hostname, port),
            config: *skeleton.config(),
        }))
    }

    fn from_handle(handle: StubHandle) -> Self {
        Self {
            handle,
            _interface: PhantomData,
        }
    }
}

impl<I: ?Sized> Stub<I> {
    pub fn handle(&self) -> &StubHandle {
        &self.handle
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.handle.endpoint
    }
}

impl<I: ?Sized> Clone for Stub<I> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _interface: PhantomData,
        }
    }
}

impl<I: ?Sized> PartialEq for Stub<I> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl<I: ?Sized> Eq for Stub<I> {}

impl<I: ?Sized> Hash for Stub<I> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.hash(state)
    }
}

impl<I: ?Sized> fmt::Debug for Stub<I> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Stub").field(&self.handle).finish()
    }
}

impl<I: ?Sized> fmt::Display for Stub<I> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.handle.fmt(f)
    }
}

// Stubs travel as their endpoint, so a remote method can hand out another skeleton.
const STUB_VERSION: u32 = 1;

fn stub_type_name<I: RemoteInterface + ?Sized>() -> String {
    format!("rmi.Stub<{}>", I::NAME)
}

impl<I: RemoteInterface + ?Sized> Typed for Stub<I> {
    fn rpc_type() -> Type {
        Type::Custom {
            name: stub_type_name::<I>(),
            version: STUB_VERSION,
        }
    }
}

impl<I: RemoteInterface + ?Sized> Encode for Stub<I> {
    fn encode(self) -> Result<Value, CodecError> {
        Ok(Value::Custom {
            name: stub_type_name::<I>(),
            version: STUB_VERSION,
            data: codec::encode_item(&self.handle.endpoint)?,
        })
    }
}

impl<I: RemoteInterface + ?Sized> Decode for Stub<I> {
    fn decode(val: Value) -> Result<Self, CodecError> {
        match val {
            Value::Custom {
                ref name,
                version,
                ref data,
            } if *name == stub_type_name::<I>() && version == STUB_VERSION => {
                let endpoint: Endpoint = codec::decode_item(data)?;
                Self::create(endpoint).map_err(|e| CodecError::Invalid(e.to_string()))
            }
            _ => Err(TypeMismatch::new(&val, Self::rpc_type()).into()),
        }
    }
}
