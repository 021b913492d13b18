//! Service-under-test endpoint helpers.
//!
//! Points a service's `grpc-server` component at a temporary Unix socket via
//! config hooks, and builds channels to that socket for client stubs.

use std::path::{Path, PathBuf};

use mockgrpc_core::FixtureError;
use serde_json::Value;
use tempfile::TempDir;
use tonic::transport::Channel;

/// Component that owns the gRPC listener in a service config.
pub const GRPC_SERVER_COMPONENT: &str = "grpc-server";
/// Field of [`GRPC_SERVER_COMPONENT`] holding the socket path.
pub const UNIX_SOCKET_PATH_KEY: &str = "unix-socket-path";

const COMPONENTS_PATH: [&str; 3] = ["components_manager", "components", GRPC_SERVER_COMPONENT];

/// Socket path inside a private temporary directory, removed on drop.
#[derive(Debug)]
pub struct UnixSocketPath {
    _dir: TempDir,
    path: PathBuf,
}

impl UnixSocketPath {
    pub fn new() -> Result<Self, FixtureError> {
        let dir = tempfile::Builder::new().prefix("userver-grpc-socket-").tempdir()?;
        let path = dir.path().join("s");
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn grpc_server_component(config: &mut Value) -> Result<&mut serde_json::Map<String, Value>, FixtureError> {
    let mut node = config;
    for (depth, key) in COMPONENTS_PATH.iter().enumerate() {
        node = node
            .get_mut(*key)
            .ok_or_else(|| FixtureError::ConfigPath(COMPONENTS_PATH[..=depth].join(".")))?;
    }
    node.as_object_mut()
        .ok_or_else(|| FixtureError::ConfigPath(COMPONENTS_PATH.join(".")))
}

/// Point the `grpc-server` component at `socket`.
pub fn patch_grpc_server_socket(config: &mut Value, socket: &Path) -> Result<(), FixtureError> {
    let component = grpc_server_component(config)?;
    component.insert(
        UNIX_SOCKET_PATH_KEY.to_owned(),
        Value::String(socket.display().to_string()),
    );
    Ok(())
}

/// `unix:<path>` endpoint of a patched service config.
pub fn grpc_service_endpoint(config: &Value) -> Result<String, FixtureError> {
    let mut node = config;
    for key in COMPONENTS_PATH {
        node = node
            .get(key)
            .ok_or_else(|| FixtureError::ConfigPath(COMPONENTS_PATH.join(".")))?;
    }
    let path = node
        .get(UNIX_SOCKET_PATH_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            FixtureError::ConfigPath(format!("{}.{UNIX_SOCKET_PATH_KEY}", COMPONENTS_PATH.join(".")))
        })?;
    Ok(format!("unix:{path}"))
}

/// Config patching hook: `(config, config_vars)`.
pub type ConfigHook = Box<dyn Fn(&mut Value, &Value) -> anyhow::Result<()> + Send + Sync>;

/// Named hooks applied, in registration order, to a service config before
/// the service starts.
#[derive(Default)]
pub struct ConfigHooks {
    hooks: Vec<(String, ConfigHook)>,
}

impl ConfigHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook<F>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&mut Value, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.push((name.into(), Box::new(hook)));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.iter().map(|(name, _)| name.as_str())
    }

    /// Run every hook; the first failure stops the chain.
    pub fn apply(&self, config: &mut Value, config_vars: &Value) -> Result<(), FixtureError> {
        for (name, hook) in &self.hooks {
            hook(config, config_vars).map_err(|source| FixtureError::Hook {
                name: name.clone(),
                source,
            })?;
            tracing::debug!(hook = %name, "service config hook applied");
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConfigHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Hook that moves the service's gRPC listener onto `socket`.
pub fn prepare_service_config(
    socket: impl Into<PathBuf>,
) -> impl Fn(&mut Value, &Value) -> anyhow::Result<()> + Send + Sync + 'static {
    let socket = socket.into();
    move |config: &mut Value, _vars: &Value| Ok(patch_grpc_server_socket(config, &socket)?)
}

/// Lazily connecting channel over a Unix socket.
///
/// Must be called from within a tokio runtime.
#[cfg(unix)]
pub fn unix_channel(path: impl AsRef<Path>) -> Result<Channel, FixtureError> {
    use hyper_util::rt::TokioIo;
    use tokio::net::UnixStream;
    use tonic::transport::{Endpoint, Uri};

    let path = std::sync::Arc::new(path.as_ref().to_path_buf());
    // The authority is never resolved; the connector below picks the socket.
    let endpoint = Endpoint::try_from("http://localhost")?;
    Ok(endpoint.connect_with_connector_lazy(tower::service_fn(move |_: Uri| {
        let path = std::sync::Arc::clone(&path);
        async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(&*path).await?)) }
    })))
}
