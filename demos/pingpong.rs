//! Ping/pong over remote interfaces.
//!
//! ```text
//! cargo run --example pingpong -- server 127.0.0.1 8000
//! cargo run --example pingpong -- client 127.0.0.1 8000
//! ```
//!
//! The server exposes a `PingServerFactory`; each `make_ping_server` call starts a fresh
//! `PingServer` skeleton on an ephemeral port and returns a stub for it.

use rmiquickly::{
    async_trait, remote_interface, Endpoint, RemoteError, Skeleton, Stub, TransportError,
};
use std::{
    env,
    error::Error,
    sync::{Arc, Mutex},
};
use tracing_subscriber::EnvFilter;

remote_interface! {
    pub trait PingServer {
        /// Answers `"Pong<idx>"`.
        #[throws(TransportError)]
        fn ping(&self, idx: i32) -> String;
    }
}

remote_interface! {
    pub trait PingServerFactory {
        #[throws(TransportError)]
        fn make_ping_server(&self) -> Stub<dyn PingServer>;
    }
}

struct Ping;

#[async_trait]
impl PingServer for Ping {
    async fn ping(&self, idx: i32) -> Result<String, RemoteError> {
        Ok(format!("Pong{idx}"))
    }
}

/// Hands out stubs addressed to the host clients used to reach the factory.
struct Factory {
    host: String,
    servers: Mutex<Vec<Skeleton<dyn PingServer>>>,
}

#[async_trait]
impl PingServerFactory for Factory {
    async fn make_ping_server(&self) -> Result<Stub<dyn PingServer>, RemoteError> {
        let skeleton = Skeleton::<dyn PingServer>::new(Arc::new(Ping), None)?;
        skeleton.start().await?;
        let stub = Stub::from_skeleton_with_host(&skeleton, &self.host)?;
        self.servers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(skeleton);
        Ok(stub)
    }
}

async fn serve(endpoint: Endpoint) -> Result<(), Box<dyn Error>> {
    let factory: Arc<dyn PingServerFactory> = Arc::new(Factory {
        host: endpoint.host().to_owned(),
        servers: Mutex::default(),
    });
    let skeleton = Skeleton::new(factory, Some(endpoint))?;
    skeleton.start().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => skeleton.stop().await,
        _ = skeleton.stopped() => {}
    }
    Ok(())
}

async fn run_client(endpoint: Endpoint) -> Result<(), Box<dyn Error>> {
    println!("{endpoint}");
    let factory = Stub::<dyn PingServerFactory>::create(endpoint)?;
    let server = factory.make_ping_server().await?;

    let mut failed = 0;
    for idx in 1..=4 {
        let pong = server.ping(idx).await?;
        println!("{pong}");
        if pong != format!("Pong{idx}") {
            failed += 1;
        }
    }
    println!("4 Tests Completed, {failed} Tests Failed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (mode, host, port) = match args.as_slice() {
        [mode, host, port] => (mode.as_str(), host.clone(), port.parse::<u16>()?),
        _ => return Err("usage: pingpong <server|client> <host> <port>".into()),
    };
    let endpoint = Endpoint::new(host, port);

    match mode {
        "server" => serve(endpoint).await,
        "client" => run_client(endpoint).await,
        other => Err(format!("unknown mode {other:?}").into()),
    }
}
