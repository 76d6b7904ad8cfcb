use rmiquickly::{
    async_trait,
    net::{codec, Reply, Request},
    remote_interface, throwable, Config, Endpoint, Error, ErrorDescriptor, RemoteError,
    ServiceError, Skeleton, SkeletonHooks, Stub, TransportError, Type, Value,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt, io,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Overdrawn {
    balance: i64,
}

impl fmt::Display for Overdrawn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "balance is only {}", self.balance)
    }
}

throwable!(Overdrawn, "bank.Overdrawn");

#[derive(Debug, Serialize, Deserialize)]
struct Frozen;

impl fmt::Display for Frozen {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("account frozen")
    }
}

throwable!(Frozen, "bank.Frozen");

remote_interface! {
    pub trait Account {
        #[throws(TransportError, Overdrawn)]
        fn withdraw(&self, amount: i64) -> i64;

        /// Raises an error the method does not declare.
        #[throws(TransportError)]
        fn freeze(&self) -> ();

        #[throws(TransportError)]
        fn explode(&self) -> bool;

        #[throws(TransportError)]
        fn stall(&self, millis: u64) -> ();
    }
}

remote_interface! {
    pub trait Unreachable {
        #[throws(Overdrawn)]
        fn poke(&self) -> ();
    }
}

struct Bank {
    balance: AtomicI64,
}

impl Bank {
    fn new(balance: i64) -> Arc<Self> {
        Arc::new(Self {
            balance: AtomicI64::new(balance),
        })
    }
}

#[async_trait]
impl Account for Bank {
    async fn withdraw(&self, amount: i64) -> Result<i64, RemoteError> {
        let balance = self.balance.load(Ordering::SeqCst);
        if amount > balance {
            return Err(Overdrawn { balance }.into());
        }
        Ok(self.balance.fetch_sub(amount, Ordering::SeqCst) - amount)
    }

    async fn freeze(&self) -> Result<(), RemoteError> {
        Err(Frozen.into())
    }

    async fn explode(&self) -> Result<bool, RemoteError> {
        panic!("boom")
    }

    async fn stall(&self, millis: u64) -> Result<(), RemoteError> {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(())
    }
}

struct Nothing;

#[async_trait]
impl Unreachable for Nothing {
    async fn poke(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
enum Event {
    NoRequest,
    TimedOut,
    Malformed,
    Panicked,
    Io,
    Other,
    Stopped { failed: bool },
}

struct Recorder(mpsc::UnboundedSender<Event>);

impl SkeletonHooks for Recorder {
    fn on_service_error(&self, cause: &ServiceError) {
        let event = match cause {
            ServiceError::NoRequest => Event::NoRequest,
            ServiceError::TimedOut(_) => Event::TimedOut,
            ServiceError::Codec(_) => Event::Malformed,
            ServiceError::Panicked(_) => Event::Panicked,
            ServiceError::Io(_) => Event::Io,
            _ => Event::Other,
        };
        let _ = self.0.send(event);
    }

    fn on_stopped(&self, cause: Option<&io::Error>) {
        let _ = self.0.send(Event::Stopped {
            failed: cause.is_some(),
        });
    }
}

fn local() -> Option<Endpoint> {
    Some(Endpoint::new("127.0.0.1", 0))
}

async fn bank() -> (Skeleton<dyn Account>, Stub<dyn Account>) {
    let skeleton = Skeleton::<dyn Account>::new(Bank::new(100), local()).unwrap();
    skeleton.start().await.unwrap();
    let stub = Stub::from_skeleton(&skeleton).unwrap();
    (skeleton, stub)
}

async fn recorded_bank(config: Config) -> (Skeleton<dyn Account>, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let skeleton = Skeleton::<dyn Account>::new(Bank::new(100), local())
        .unwrap()
        .with_config(config)
        .with_hooks(Recorder(tx));
    skeleton.start().await.unwrap();
    (skeleton, rx)
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn send_frame(port: u16, body: &[u8]) -> TcpStream {
    let mut sock = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    sock.write_u32(body.len() as u32).await.unwrap();
    sock.write_all(body).await.unwrap();
    sock
}

async fn read_reply(sock: &mut TcpStream) -> Reply {
    let len = sock.read_u32().await.unwrap();
    let mut body = vec![0; len as usize];
    sock.read_exact(&mut body).await.unwrap();
    codec::decode_reply(&body, codec::DEFAULT_MAX_FRAME_LENGTH).unwrap()
}

fn err_kind(reply: Reply) -> String {
    match reply {
        Reply::Err(descriptor) => descriptor.kind,
        Reply::Ok(value) => panic!("expected an error reply, got {value:?}"),
    }
}

#[tokio::test]
async fn wrong_address_is_transport_error() {
    let stub = Stub::<dyn Account>::create(Endpoint::new("127.0.0.1", free_port())).unwrap();
    let err = stub.withdraw(1).await.unwrap_err();
    assert!(matches!(err, RemoteError::Transport(TransportError::Io(_))));
}

#[tokio::test]
async fn declared_error_is_raised_to_the_caller() {
    let (skeleton, stub) = bank().await;

    assert_eq!(stub.withdraw(30).await.unwrap(), 70);
    let err = stub.withdraw(500).await.unwrap_err();
    let app = err.as_application().expect("application error");
    assert!(app.is::<Overdrawn>());
    assert_eq!(app.message(), "balance is only 70");
    assert_eq!(app.downcast::<Overdrawn>(), Some(Overdrawn { balance: 70 }));
    assert_eq!(app.downcast::<Frozen>().map(|_| ()), None);

    skeleton.stop().await;
}

#[tokio::test]
async fn undeclared_error_is_wrapped() {
    let (skeleton, stub) = bank().await;

    match stub.freeze().await.unwrap_err() {
        RemoteError::Transport(TransportError::Remote(descriptor)) => {
            assert_eq!(descriptor.kind, "bank.Frozen");
            assert_eq!(descriptor.message, "account frozen");
        }
        other => panic!("unexpected {other:?}"),
    }
    skeleton.stop().await;
}

#[tokio::test]
async fn interface_without_transport_kind_is_rejected() {
    let err = Stub::<dyn Unreachable>::create(Endpoint::new("127.0.0.1", 1)).unwrap_err();
    assert!(matches!(err, Error::InterfaceShape(_)));

    let Err(err) = Skeleton::<dyn Unreachable>::new(Arc::new(Nothing), None) else {
        panic!("skeleton accepted a malformed interface");
    };
    assert!(matches!(err, Error::InterfaceShape(_)));
}

#[tokio::test]
async fn malformed_request_gets_framing_error() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let skeleton = Skeleton::<dyn Account>::new(Bank::new(100), local())
        .unwrap()
        .with_hooks(Recorder(tx));
    skeleton.start().await.unwrap();
    let port = skeleton.address().unwrap().port();

    let mut sock = send_frame(port, &[0xde, 0xad, 0xbe, 0xef]).await;
    assert_eq!(err_kind(read_reply(&mut sock).await), ErrorDescriptor::FRAMING);
    assert_eq!(rx.recv().await, Some(Event::Malformed));

    // The skeleton keeps serving.
    let stub = Stub::<dyn Account>::from_skeleton(&skeleton).unwrap();
    assert_eq!(stub.withdraw(1).await.unwrap(), 99);
    skeleton.stop().await;
}

#[tokio::test]
async fn oversized_frame_is_refused() {
    let (skeleton, mut rx) = recorded_bank(Config::default()).await;
    let port = skeleton.address().unwrap().port();

    let mut sock = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    sock.write_u32(64 * 1024 * 1024).await.unwrap();
    assert_eq!(err_kind(read_reply(&mut sock).await), ErrorDescriptor::FRAMING);
    assert_eq!(rx.recv().await, Some(Event::Io));
    skeleton.stop().await;
}

#[tokio::test]
async fn bad_calls_are_reported_by_kind() {
    let (skeleton, _stub) = bank().await;
    let port = skeleton.address().unwrap().port();
    let max = codec::DEFAULT_MAX_FRAME_LENGTH;

    let unknown = Request {
        selector: "deposit".into(),
        param_types: vec![Type::I64],
        args: vec![Value::I64(1)],
    };
    let mut sock = send_frame(port, &codec::encode_request(&unknown, max).unwrap()).await;
    assert_eq!(err_kind(read_reply(&mut sock).await), ErrorDescriptor::NO_SUCH_METHOD);

    let mismatched = Request {
        selector: "withdraw".into(),
        param_types: vec![Type::I64],
        args: vec![Value::Bool(true)],
    };
    let mut sock = send_frame(port, &codec::encode_request(&mismatched, max).unwrap()).await;
    assert_eq!(err_kind(read_reply(&mut sock).await), ErrorDescriptor::ARGUMENT_MISMATCH);

    skeleton.stop().await;
}

#[tokio::test]
async fn panicking_method_does_not_take_down_the_skeleton() {
    let (skeleton, mut rx) = recorded_bank(Config::default()).await;
    let stub = Stub::<dyn Account>::from_skeleton(&skeleton).unwrap();

    match stub.explode().await.unwrap_err() {
        RemoteError::Transport(TransportError::Remote(descriptor)) => {
            assert_eq!(descriptor.kind, ErrorDescriptor::SERVER)
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(rx.recv().await, Some(Event::Panicked));
    assert_eq!(stub.withdraw(10).await.unwrap(), 90);
    skeleton.stop().await;
}

#[tokio::test]
async fn idle_connections_are_reported() {
    let config = Config::new().with_timeout(Duration::from_millis(100));
    let (skeleton, mut rx) = recorded_bank(config).await;
    let port = skeleton.address().unwrap().port();

    drop(TcpStream::connect(("127.0.0.1", port)).await.unwrap());
    assert_eq!(rx.recv().await, Some(Event::NoRequest));

    let mut idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    assert_eq!(rx.recv().await, Some(Event::TimedOut));
    assert_eq!(err_kind(read_reply(&mut idle).await), ErrorDescriptor::FRAMING);

    skeleton.stop().await;
    assert_eq!(rx.recv().await, Some(Event::Stopped { failed: false }));
}

#[tokio::test]
async fn client_timeout() {
    let (skeleton, _) = bank().await;
    let stub = Stub::<dyn Account>::create_with_config(
        skeleton.address().unwrap(),
        Config::new().with_timeout(Duration::from_millis(50)),
    )
    .unwrap();

    let err = stub.stall(500).await.unwrap_err();
    assert!(matches!(err, RemoteError::Transport(TransportError::TimedOut(_))));
    skeleton.stop().await;
}

#[tokio::test]
async fn stub_factories_need_an_address() {
    let unbound = Skeleton::<dyn Account>::new(Bank::new(0), None).unwrap();
    assert!(matches!(
        Stub::from_skeleton(&unbound).unwrap_err(),
        Error::State(_)
    ));
    assert!(matches!(
        Stub::from_skeleton_with_host(&unbound, "localhost").unwrap_err(),
        Error::State(_)
    ));

    let ephemeral = Skeleton::<dyn Account>::new(Bank::new(0), local()).unwrap();
    assert!(matches!(
        Stub::from_skeleton(&ephemeral).unwrap_err(),
        Error::State(_)
    ));
    assert!(matches!(
        Stub::from_skeleton_with_host(&ephemeral, "").unwrap_err(),
        Error::Argument(_)
    ));

    let fixed = Skeleton::<dyn Account>::new(Bank::new(0), Some(Endpoint::new("127.0.0.1", 4321)))
        .unwrap();
    let stub = Stub::from_skeleton(&fixed).unwrap();
    assert_eq!(stub.endpoint(), &Endpoint::new("127.0.0.1", 4321));
}

#[tokio::test]
async fn lifecycle() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let skeleton = Skeleton::<dyn Account>::new(Bank::new(100), local())
        .unwrap()
        .with_hooks(Recorder(tx));

    // Stopping a fresh skeleton does nothing.
    skeleton.stop().await;
    assert!(!skeleton.is_running());

    skeleton.start().await.unwrap();
    assert!(skeleton.is_running());
    assert!(matches!(skeleton.start().await, Err(Error::State(_))));

    let stub = Stub::<dyn Account>::from_skeleton(&skeleton).unwrap();
    skeleton.stop().await;
    skeleton.stopped().await;
    assert!(!skeleton.is_running());
    assert_eq!(rx.recv().await, Some(Event::Stopped { failed: false }));

    assert!(stub.withdraw(1).await.unwrap_err().is_transport());
    assert!(matches!(skeleton.start().await, Err(Error::State(_))));
    skeleton.stop().await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn bind_failure_stops_the_skeleton() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let skeleton =
        Skeleton::<dyn Account>::new(Bank::new(0), Some(Endpoint::new("127.0.0.1", port)))
            .unwrap()
            .with_hooks(Recorder(tx));

    let err = skeleton.start().await.unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Io(_))));
    assert_eq!(rx.recv().await, Some(Event::Stopped { failed: true }));
    skeleton.stopped().await;
    assert!(!skeleton.is_running());
    assert!(matches!(skeleton.start().await, Err(Error::State(_))));
}

#[tokio::test]
async fn stop_while_binding_wins() {
    let skeleton =
        Skeleton::<dyn Account>::new(Bank::new(100), Some(Endpoint::new("localhost", 0))).unwrap();

    let (started, ()) = tokio::join!(skeleton.start(), async {
        tokio::task::yield_now().await;
        skeleton.stop().await;
    });
    // Depending on how far the bind got, start() either completed or was preempted.
    assert!(matches!(started, Ok(()) | Err(Error::State(_))));
    assert!(!skeleton.is_running());
    skeleton.stopped().await;

    if let Some(address) = skeleton.address().filter(Endpoint::has_port) {
        let stub = Stub::<dyn Account>::create(address).unwrap();
        assert!(stub.withdraw(1).await.unwrap_err().is_transport());
    }
    assert!(matches!(skeleton.start().await, Err(Error::State(_))));
}

#[tokio::test]
async fn abandoned_start_can_be_retried() {
    let skeleton =
        Skeleton::<dyn Account>::new(Bank::new(100), Some(Endpoint::new("localhost", 0))).unwrap();

    match tokio::time::timeout(Duration::ZERO, skeleton.start()).await {
        Ok(started) => started.unwrap(),
        Err(_elapsed) => {
            assert!(!skeleton.is_running());
            skeleton.start().await.unwrap();
        }
    }
    assert!(skeleton.is_running());

    let stub = Stub::<dyn Account>::from_skeleton(&skeleton).unwrap();
    assert_eq!(stub.withdraw(1).await.unwrap(), 99);
    skeleton.stop().await;
    skeleton.stopped().await;
}
