//! Shared in-process gRPC mock listener.
//!
//! The listener is started once per session and keeps serving while mocks are
//! attached to it one by one. Requests are routed by the service segment of
//! the path (`/<package.Service>/<Method>`); services that were never attached
//! answer `UNIMPLEMENTED`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use mockgrpc_core::{FixtureError, ListenAddr, MockServerConfig};
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::body::Body;
use tonic::server::NamedService;
use tonic::service::Routes;
use tonic::transport::{Channel, Server};
use tower::util::BoxCloneService;
use tower::{Service, ServiceExt};

type GrpcService = BoxCloneService<http::Request<Body>, http::Response<Body>, Infallible>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn service_name(path: &str) -> &str {
    path.trim_start_matches('/').split('/').next().unwrap_or("")
}

fn unimplemented_response() -> http::Response<Body> {
    let mut response = http::Response::new(Body::default());
    let headers = response.headers_mut();
    headers.insert(
        tonic::Status::GRPC_STATUS,
        (tonic::Code::Unimplemented as i32).into(),
    );
    headers.insert(
        http::header::CONTENT_TYPE,
        tonic::metadata::GRPC_CONTENT_TYPE,
    );
    response
}

/// Service table consulted on every request.
#[derive(Clone, Default)]
struct MockRoutes {
    services: Arc<Mutex<HashMap<String, GrpcService>>>,
}

impl Service<http::Request<axum::body::Body>> for MockRoutes {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<axum::body::Body>) -> Self::Future {
        let name = service_name(request.uri().path()).to_owned();
        let service = lock(&self.services).get(&name).cloned();
        Box::pin(async move {
            match service {
                Some(service) => service.oneshot(request.map(Body::new)).await,
                None => {
                    tracing::warn!(service = %name, "request for a service that is not attached");
                    Ok(unimplemented_response())
                }
            }
        })
    }
}

enum Bound {
    Tcp(std::net::TcpListener),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixListener),
}

fn bind(addr: &ListenAddr) -> Result<(Bound, ListenAddr), FixtureError> {
    match addr {
        ListenAddr::Tcp(addr) => {
            let listener = std::net::TcpListener::bind(addr)?;
            listener.set_nonblocking(true)?;
            let local = listener.local_addr()?;
            Ok((Bound::Tcp(listener), ListenAddr::Tcp(local)))
        }
        #[cfg(unix)]
        ListenAddr::Unix(path) => {
            remove_stale_socket(path)?;
            let listener = std::os::unix::net::UnixListener::bind(path)?;
            listener.set_nonblocking(true)?;
            Ok((Bound::Unix(listener), ListenAddr::Unix(path.clone())))
        }
        #[cfg(not(unix))]
        ListenAddr::Unix(path) => Err(FixtureError::InvalidEndpoint(format!(
            "unix:{}",
            path.display()
        ))),
    }
}

/// Remove a socket file left behind by a listener that is gone.
///
/// Processes exit without dropping the process-wide session, so its socket
/// file outlives it. A socket somebody still accepts on is left alone, and so
/// is anything that is not a socket.
#[cfg(unix)]
fn remove_stale_socket(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !metadata.file_type().is_socket() {
        return Ok(());
    }
    match std::os::unix::net::UnixStream::connect(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            tracing::info!(path = %path.display(), "removing stale grpc mockserver socket");
            std::fs::remove_file(path)
        }
        Err(_) => Ok(()),
    }
}

async fn serve(
    routes: MockRoutes,
    bound: Bound,
    shutdown: oneshot::Receiver<()>,
) -> Result<(), FixtureError> {
    let router = Server::builder().add_routes(Routes::from(
        axum::Router::new().fallback_service(routes),
    ));
    let signal = async {
        let _ = shutdown.await;
    };
    match bound {
        Bound::Tcp(listener) => {
            let listener = tokio::net::TcpListener::from_std(listener)?;
            router
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
                .await?;
        }
        #[cfg(unix)]
        Bound::Unix(listener) => {
            let path = listener
                .local_addr()?
                .as_pathname()
                .map(|p| p.to_path_buf());
            let listener = tokio::net::UnixListener::from_std(listener)?;
            router
                .serve_with_incoming_shutdown(
                    tokio_stream::wrappers::UnixListenerStream::new(listener),
                    signal,
                )
                .await?;
            if let Some(path) = path {
                let _ = std::fs::remove_file(path);
            }
        }
    }
    Ok(())
}

struct Inner {
    addr: ListenAddr,
    routes: MockRoutes,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl Inner {
    fn shutdown(&self) {
        if let Some(tx) = lock(&self.shutdown).take() {
            tracing::info!(endpoint = %endpoint_of(&self.addr), "grpc mockserver shutting down");
            let _ = tx.send(());
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn endpoint_of(addr: &ListenAddr) -> String {
    match addr {
        ListenAddr::Tcp(addr) => format!("http://{addr}"),
        ListenAddr::Unix(path) => format!("unix:{}", path.display()),
    }
}

/// Handle to the session's mock listener. Clones share the listener.
#[derive(Clone)]
pub struct GrpcMockServer {
    inner: Arc<Inner>,
}

impl GrpcMockServer {
    /// Bind the listener and start serving on a dedicated runtime thread.
    ///
    /// The thread keeps running until [`GrpcMockServer::shutdown`] or until
    /// the last handle is dropped.
    pub fn start(config: &MockServerConfig) -> Result<Self, FixtureError> {
        let (bound, addr) = bind(&config.listen_addr())?;
        let routes = MockRoutes::default();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("grpc-mockserver-worker")
            .enable_all()
            .build()?;
        let serve_routes = routes.clone();
        std::thread::Builder::new()
            .name("grpc-mockserver".to_owned())
            .spawn(move || {
                if let Err(e) = runtime.block_on(serve(serve_routes, bound, shutdown_rx)) {
                    tracing::error!(error = %e, "grpc mockserver stopped with error");
                }
            })?;

        tracing::info!(endpoint = %endpoint_of(&addr), "grpc mockserver started");
        Ok(Self {
            inner: Arc::new(Inner {
                addr,
                routes,
                shutdown: Mutex::new(Some(shutdown_tx)),
            }),
        })
    }

    /// Resolved listen address (the real port when 0 was requested).
    pub fn listen_addr(&self) -> &ListenAddr {
        &self.inner.addr
    }

    /// `http://host:port` or `unix:/path`.
    pub fn endpoint(&self) -> String {
        endpoint_of(&self.inner.addr)
    }

    /// Make `service` the live implementation of its gRPC service name.
    pub fn add_service<S>(&self, service: S) -> Result<(), FixtureError>
    where
        S: Service<http::Request<Body>, Response = http::Response<Body>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        let mut services = lock(&self.inner.routes.services);
        if services.contains_key(S::NAME) {
            return Err(FixtureError::ServiceAlreadyAttached {
                service: S::NAME.to_owned(),
            });
        }
        services.insert(S::NAME.to_owned(), BoxCloneService::new(service));
        tracing::info!(service = S::NAME, "service attached to grpc mockserver");
        Ok(())
    }

    /// Names of attached services, sorted.
    pub fn attached_services(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.routes.services)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Lazily connecting channel to the listener, for building client stubs.
    ///
    /// Must be called from within a tokio runtime.
    pub fn channel(&self) -> Result<Channel, FixtureError> {
        match &self.inner.addr {
            ListenAddr::Tcp(_) => Ok(Channel::from_shared(self.endpoint())
                .map_err(|_| FixtureError::InvalidEndpoint(self.endpoint()))?
                .connect_lazy()),
            #[cfg(unix)]
            ListenAddr::Unix(path) => crate::endpoint::unix_channel(path),
            #[cfg(not(unix))]
            ListenAddr::Unix(_) => Err(FixtureError::InvalidEndpoint(self.endpoint())),
        }
    }

    /// Stop accepting connections. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for GrpcMockServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcMockServer")
            .field("endpoint", &self.endpoint())
            .field("services", &self.attached_services())
            .finish()
    }
}
