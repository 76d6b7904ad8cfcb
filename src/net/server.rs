use super::{codec, Reply, Request};
use crate::{
    config::Config,
    dispatcher::{DispatchError, Dispatcher},
    endpoint::Endpoint,
    error::{Error, ErrorDescriptor, ServiceError, TransportError},
    interface::{InterfaceDescriptor, MethodKey},
    RemoteInterface,
};
use bytes::{Bytes, BytesMut};
use futures::{FutureExt, SinkExt, StreamExt};
use std::{
    io, mem,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::{
    codec::{Framed, LengthDelimitedCodec},
    sync::CancellationToken,
    task::TaskTracker,
};
use tracing::{debug, info, warn};

/// Override points for skeleton events.
///
/// Hooks run on the skeleton's tasks and must not block.
pub trait SkeletonHooks: Send + Sync + 'static {
    /// A transient accept failure. Returns whether the skeleton keeps accepting.
    fn on_listen_error(&self, cause: &io::Error) -> bool {
        warn!("accept failed, continuing: {cause}");
        true
    }

    /// A failure while serving a single connection.
    fn on_service_error(&self, cause: &ServiceError) {
        debug!("service error: {cause}");
    }

    /// The skeleton reached its terminal state; `cause` is set when a fatal error stopped it.
    fn on_stopped(&self, _cause: Option<&io::Error>) {}
}

#[derive(Debug, Default)]
pub struct DefaultHooks;

impl SkeletonHooks for DefaultHooks {}

enum State {
    Fresh,
    Starting,
    Running {
        address: Endpoint,
        acceptor: JoinHandle<()>,
    },
    Stopped(Option<Endpoint>),
}

struct Shared<I: RemoteInterface + ?Sized> {
    interface: InterfaceDescriptor,
    target: Arc<I>,
    dispatcher: Dispatcher<I>,
    hooks: Arc<dyn SkeletonHooks>,
    config: Config,
    requested: Option<Endpoint>,
    state: Mutex<State>,
    /// Stops the acceptor and connections still waiting for their request.
    shutdown: CancellationToken,
    /// Fires once the terminal state has been reached.
    stopped: CancellationToken,
    connections: TaskTracker,
}

/// Server side of a remote interface: accepts connections and dispatches one request per
/// connection to the implementation object.
///
/// The implementation is called from many connection tasks at once; it must be safe to share.
///
/// Lifecycle: fresh → running → stopped. A skeleton cannot be restarted.
pub struct Skeleton<I: RemoteInterface + ?Sized> {
    shared: Arc<Shared<I>>,
}

impl<I: RemoteInterface + ?Sized> Skeleton<I> {
    /// Creates a skeleton serving `target`.
    ///
    /// Without an endpoint it binds every interface on an ephemeral port. An endpoint with an
    /// empty host binds the wildcard address; port 0 asks the OS for a port.
    pub fn new(target: Arc<I>, endpoint: Option<Endpoint>) -> Result<Self, Error> {
        let interface = I::descriptor();
        interface.validate()?;
        let dispatcher = I::dispatcher();
        if let Some(key) = dispatcher.missing(&interface) {
            return Err(Error::InterfaceShape(format!(
                "{} has no implementation of {key}",
                interface.name()
            )));
        }
        let requested = endpoint.map(|e| {
            if e.host().is_empty() {
                Endpoint::wildcard(e.port())
            } else {
                e
            }
        });

        Ok(Self {
            shared: Arc::new(Shared {
                interface,
                target,
                dispatcher,
                hooks: Arc::new(DefaultHooks),
                config: Config::default(),
                requested,
                state: Mutex::new(State::Fresh),
                shutdown: CancellationToken::new(),
                stopped: CancellationToken::new(),
                connections: TaskTracker::new(),
            }),
        })
    }

    pub fn with_config(self, config: Config) -> Self {
        self.reconfigure(|shared| shared.config = config)
    }

    pub fn with_hooks(self, hooks: impl SkeletonHooks) -> Self {
        self.reconfigure(|shared| shared.hooks = Arc::new(hooks))
    }

    fn reconfigure(mut self, f: impl FnOnce(&mut Shared<I>)) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => f(shared),
            None => warn!("skeleton is serving, configuration ignored"),
        }
        self
    }

    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.shared.interface
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// The bound endpoint once started, otherwise the endpoint the skeleton was created with.
    pub fn address(&self) -> Option<Endpoint> {
        match &*self.shared.lock_state() {
            State::Fresh | State::Starting => self.shared.requested.clone(),
            State::Running { address, .. } => Some(address.clone()),
            State::Stopped(address) => address.clone().or_else(|| self.shared.requested.clone()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.shared.lock_state(), State::Running { .. })
    }

    /// Binds the listening socket and spawns the acceptor task.
    ///
    /// # Errors
    /// [`Error::State`] unless the skeleton is fresh, or when [`stop`](Self::stop) is called
    /// before the bind completes. A bind failure stops the skeleton and is returned as
    /// [`Error::Transport`].
    ///
    /// Dropping the returned future before the bind completes leaves the skeleton fresh.
    pub async fn start(&self) -> Result<(), Error> {
        {
            let mut state = self.shared.lock_state();
            if !matches!(*state, State::Fresh) {
                return Err(Error::State("skeleton has already been started"));
            }
            *state = State::Starting;
        }
        let mut pending = PendingStart::new(&self.shared);

        let requested = self.shared.requested.clone().unwrap_or_default();
        let bound = bind(&requested).await;
        pending.disarm();
        let (listener, port) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                warn!("unable to listen on {requested}: {e}");
                *self.shared.lock_state() = State::Stopped(None);
                self.shared.finish(Some(&e));
                return Err(TransportError::Io(e).into());
            }
        };
        let address = Endpoint::new(requested.host(), port);

        let mut state = self.shared.lock_state();
        // A stop() issued while binding cancels shutdown under this lock.
        if self.shared.shutdown.is_cancelled() {
            *state = State::Stopped(None);
            drop(state);
            drop(listener);
            info!("skeleton for {} stopped before serving", self.shared.interface);
            self.shared.finish(None);
            return Err(Error::State("skeleton was stopped while starting"));
        }
        info!("skeleton for {} listening on {address}", self.shared.interface);
        let acceptor = tokio::spawn(accept_loop(self.shared.clone(), listener));
        *state = State::Running { address, acceptor };
        Ok(())
    }

    /// Stops accepting, then waits for the acceptor and for in-flight calls to finish.
    ///
    /// A fresh or already stopped skeleton is left as is. A skeleton still binding is stopped
    /// as soon as its bind completes.
    pub async fn stop(&self) {
        let acceptor = {
            let mut state = self.shared.lock_state();
            match mem::replace(&mut *state, State::Fresh) {
                State::Running { address, acceptor } => {
                    *state = State::Stopped(Some(address));
                    Some(acceptor)
                }
                State::Starting => {
                    *state = State::Starting;
                    self.shared.shutdown.cancel();
                    None
                }
                other => {
                    *state = other;
                    return;
                }
            }
        };

        let Some(acceptor) = acceptor else {
            // start() observes the cancellation once its bind completes.
            return self.stopped().await;
        };
        self.shared.shutdown.cancel();
        if let Err(e) = acceptor.await {
            warn!("acceptor task failed: {e}");
        }
        self.shared.drain().await;
        info!("skeleton for {} stopped", self.shared.interface);
        self.shared.finish(None);
    }

    /// Resolves once the skeleton is stopped, by [`stop`](Self::stop) or by a fatal error.
    pub async fn stopped(&self) {
        self.shared.stopped.cancelled().await
    }
}

impl<I: RemoteInterface + ?Sized> Drop for Skeleton<I> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

/// Undoes the `Starting` state when a `start()` future is dropped before its bind completes.
struct PendingStart<'a, I: RemoteInterface + ?Sized> {
    shared: &'a Shared<I>,
    armed: bool,
}

impl<'a, I: RemoteInterface + ?Sized> PendingStart<'a, I> {
    fn new(shared: &'a Shared<I>) -> Self {
        Self {
            shared,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<I: RemoteInterface + ?Sized> Drop for PendingStart<'_, I> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let stop_requested = {
            let mut state = self.shared.lock_state();
            if !matches!(*state, State::Starting) {
                return;
            }
            let stop_requested = self.shared.shutdown.is_cancelled();
            *state = if stop_requested {
                State::Stopped(None)
            } else {
                State::Fresh
            };
            stop_requested
        };
        if stop_requested {
            self.shared.finish(None);
        }
    }
}

async fn bind(requested: &Endpoint) -> io::Result<(TcpListener, u16)> {
    let listener = TcpListener::bind((requested.host(), requested.port())).await?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

fn is_transient(e: &io::Error) -> bool {
    use io::ErrorKind::*;
    matches!(
        e.kind(),
        ConnectionAborted | ConnectionReset | ConnectionRefused | Interrupted | WouldBlock | TimedOut
    )
}

async fn accept_loop<I: RemoteInterface + ?Sized>(shared: Arc<Shared<I>>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((sock, peer)) => {
                debug!("accepted connection from {peer}");
                let conn_shared = shared.clone();
                shared.connections.spawn(serve_connection(conn_shared, sock, peer));
            }
            Err(e) if is_transient(&e) && shared.hooks.on_listen_error(&e) => continue,
            Err(e) => {
                warn!("skeleton for {} stopping: {e}", shared.interface);
                drop(listener);
                shared.fail(e).await;
                return;
            }
        }
    }
}

async fn serve_connection<I: RemoteInterface + ?Sized>(
    shared: Arc<Shared<I>>,
    sock: TcpStream,
    peer: SocketAddr,
) {
    let max = shared.config.max_frame_length();
    let mut sock = Framed::new(sock, codec::frame_codec(max));

    let received = tokio::select! {
        _ = shared.shutdown.cancelled() => {
            debug!("dropping idle connection from {peer}");
            return;
        }
        received = next_frame(&mut sock, &shared.config) => received,
    };
    let frame = match received {
        Ok(Some(frame)) => Ok(frame),
        Ok(None) => return shared.report(ServiceError::NoRequest),
        Err(e) => Err(e),
    };

    let reply = match frame.and_then(|frame| Ok(codec::decode_request(&frame, max)?)) {
        Ok(request) => shared.dispatch(request).await,
        Err(e) => {
            let reply = Reply::Err(ErrorDescriptor::framing(&e));
            shared.report(e);
            reply
        }
    };

    let encoded = codec::encode_reply(&reply, max).or_else(|e| {
        let fallback = Reply::Err(ErrorDescriptor::framing(&e));
        shared.report(e.into());
        codec::encode_reply(&fallback, max)
    });
    match encoded {
        Ok(bytes) => {
            if let Err(e) = sock.send(Bytes::from(bytes)).await {
                shared.report(e.into());
            }
        }
        Err(e) => shared.report(e.into()),
    }
    // Flushes and shuts down the write half; the socket closes when `sock` drops.
    let _ = SinkExt::<Bytes>::close(&mut sock).await;
}

async fn next_frame(
    sock: &mut Framed<TcpStream, LengthDelimitedCodec>,
    config: &Config,
) -> Result<Option<BytesMut>, ServiceError> {
    let next = match config.timeout() {
        Some(limit) => tokio::time::timeout(limit, sock.next())
            .await
            .map_err(|_| ServiceError::TimedOut(limit))?,
        None => sock.next().await,
    };
    Ok(next.transpose()?)
}

impl<I: RemoteInterface + ?Sized> Shared<I> {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn report(&self, err: ServiceError) {
        self.hooks.on_service_error(&err);
    }

    async fn dispatch(&self, request: Request) -> Reply {
        let Request {
            selector,
            param_types,
            args,
        } = request;
        let key = MethodKey::new(selector, param_types);
        let method = key.to_string();

        let call = self.dispatcher.call(self.target.clone(), key, args);
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(value)) => Reply::Ok(value),
            Ok(Err(DispatchError::Raised(err))) => Reply::Err(err.into_descriptor()),
            Ok(Err(err)) => {
                let descriptor = ErrorDescriptor::for_dispatch(&err);
                self.report(err.into());
                Reply::Err(descriptor)
            }
            Err(_panic) => {
                let descriptor =
                    ErrorDescriptor::new(ErrorDescriptor::SERVER, format!("{method} panicked"));
                self.report(ServiceError::Panicked(method));
                Reply::Err(descriptor)
            }
        }
    }

    async fn drain(&self) {
        self.connections.close();
        self.connections.wait().await;
    }

    /// Enters the terminal state after a fatal accept error, unless `stop` got there first.
    async fn fail(&self, cause: io::Error) {
        {
            let mut state = self.lock_state();
            match mem::replace(&mut *state, State::Fresh) {
                State::Running { address, .. } => *state = State::Stopped(Some(address)),
                other => {
                    *state = other;
                    return;
                }
            }
        }
        self.shutdown.cancel();
        self.drain().await;
        self.finish(Some(&cause));
    }

    fn finish(&self, cause: Option<&io::Error>) {
        self.hooks.on_stopped(cause);
        self.stopped.cancel();
    }
}
