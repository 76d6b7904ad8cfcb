use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::{
    fmt, io,
    net::{IpAddr, SocketAddr, ToSocketAddrs},
};

/// A `(host, port)` pair naming a skeleton.
///
/// Equality is literal: `localhost:80` and `127.0.0.1:80` are different endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub const WILDCARD_HOST: &'static str = "0.0.0.0";
    /// Asks the OS for an ephemeral port when binding.
    pub const UNASSIGNED_PORT: u16 = 0;

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// An endpoint on all local interfaces.
    pub fn wildcard(port: u16) -> Self {
        Self::new(Self::WILDCARD_HOST, port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn has_port(&self) -> bool {
        self.port != Self::UNASSIGNED_PORT
    }

    pub fn is_wildcard(&self) -> bool {
        match self.host.parse::<IpAddr>() {
            Ok(ip) => ip.is_unspecified(),
            Err(_) => self.host.is_empty(),
        }
    }

    /// Replaces a wildcard host with a loopback address of the same family.
    ///
    /// The result only reaches the skeleton from the same machine. Stubs handed to other
    /// hosts should be built with
    /// [`Stub::from_skeleton_with_host`](crate::Stub::from_skeleton_with_host).
    pub fn resolve_local(&self) -> Result<Endpoint, Error> {
        if !self.is_wildcard() {
            return Ok(self.clone());
        }
        let want_v6 = matches!(self.host.parse::<IpAddr>(), Ok(IpAddr::V6(_)));
        let resolution_error = |source| Error::HostResolution {
            host: self.host.clone(),
            source,
        };
        let addr = ("localhost", self.port)
            .to_socket_addrs()
            .map_err(resolution_error)?
            .find(|addr| addr.is_ipv6() == want_v6)
            .ok_or_else(|| {
                resolution_error(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no local address of the wildcard's family",
                ))
            })?;
        Ok(Endpoint::new(addr.ip().to_string(), self.port))
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::wildcard(Self::UNASSIGNED_PORT)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
