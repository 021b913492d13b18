use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default bound on waiting for another test's scope on the same mock.
pub const DEFAULT_SCOPE_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the shared mock listener accepts connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

/// Mock listener configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Interface to bind (default `127.0.0.1`). Env var: `GRPC_MOCKSERVER_HOST`.
    pub host: IpAddr,
    /// TCP port (default 0, picked by the OS). Env var: `GRPC_MOCKSERVER_PORT`.
    pub port: u16,
    /// Unix socket path; takes precedence over host/port. Env var: `GRPC_MOCKSERVER_SOCKET`.
    pub unix_socket: Option<PathBuf>,
    /// Longest wait for a mock scope held by another test (default 30s).
    /// Env var: `GRPC_MOCKSERVER_SCOPE_TIMEOUT_MS`.
    pub scope_timeout: Duration,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            unix_socket: None,
            scope_timeout: DEFAULT_SCOPE_TIMEOUT,
        }
    }
}

impl MockServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("GRPC_MOCKSERVER_HOST")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.host),
            port: lookup("GRPC_MOCKSERVER_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            unix_socket: lookup("GRPC_MOCKSERVER_SOCKET")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            scope_timeout: lookup("GRPC_MOCKSERVER_SCOPE_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.scope_timeout),
        }
    }

    /// Config for a listener on the given Unix socket.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self {
            unix_socket: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn listen_addr(&self) -> ListenAddr {
        match &self.unix_socket {
            Some(path) => ListenAddr::Unix(path.clone()),
            None => ListenAddr::Tcp(SocketAddr::new(self.host, self.port)),
        }
    }
}
