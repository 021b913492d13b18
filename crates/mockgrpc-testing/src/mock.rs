//! Mock servicers and their per-test recording scopes.
//!
//! A [`GrpcMock`] is created once per session for one servicer. Tests never
//! touch it directly: they enter a [`MockScope`], install handlers, and the
//! scope wipes every handler and call log when it is dropped.
//!
//! Only one test at a time holds the scope of a mock. Waiting for it is
//! bounded, and a thread asking again for a scope it already holds is refused
//! at once.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use mockgrpc_core::{DEFAULT_SCOPE_TIMEOUT, FixtureError};
use tokio::sync::OwnedMutexGuard;
use tonic::{Request, Response, Status};

use crate::servicer::ServicerDef;

type ErasedMethod = Arc<dyn Any + Send + Sync>;

const SCOPE_POLL_INTERVAL: Duration = Duration::from_millis(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Requests received by one mocked method, oldest first.
pub struct CallQueue<Req> {
    calls: Arc<Mutex<VecDeque<Req>>>,
    times_called: Arc<AtomicUsize>,
}

impl<Req> Clone for CallQueue<Req> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
            times_called: Arc::clone(&self.times_called),
        }
    }
}

impl<Req> CallQueue<Req> {
    fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(VecDeque::new())),
            times_called: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn push(&self, request: Req) {
        lock(&self.calls).push_back(request);
        self.times_called.fetch_add(1, Ordering::SeqCst);
    }

    /// Total calls, including ones already taken with [`CallQueue::next_call`].
    pub fn times_called(&self) -> usize {
        self.times_called.load(Ordering::SeqCst)
    }

    pub fn has_calls(&self) -> bool {
        !lock(&self.calls).is_empty()
    }

    pub fn next_call(&self) -> Option<Req> {
        lock(&self.calls).pop_front()
    }
}

impl<Req> fmt::Debug for CallQueue<Req> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallQueue")
            .field("times_called", &self.times_called())
            .finish()
    }
}

type Handler<Req, Resp> = Box<dyn Fn(&Request<Req>) -> Result<Resp, Status> + Send + Sync>;

struct InstalledMethod<Req, Resp> {
    handler: Handler<Req, Resp>,
    calls: CallQueue<Req>,
}

struct MockState {
    servicer: ServicerDef,
    methods: Mutex<HashMap<String, ErasedMethod>>,
    scope_lock: Arc<tokio::sync::Mutex<()>>,
    holder: Mutex<Option<ThreadId>>,
    scoped: AtomicBool,
    scopes_released: AtomicUsize,
}

impl MockState {
    fn check_reentry(&self) -> Result<(), FixtureError> {
        if *lock(&self.holder) == Some(std::thread::current().id()) {
            return Err(FixtureError::ScopeAlreadyHeld {
                servicer: self.servicer.name.clone(),
            });
        }
        Ok(())
    }

    fn timed_out(&self, timeout: Duration) -> FixtureError {
        tracing::warn!(servicer = %self.servicer.name, ?timeout, "gave up waiting for mock scope");
        FixtureError::ScopeTimeout {
            servicer: self.servicer.name.clone(),
            timeout,
        }
    }
}

/// Test double standing in for a servicer implementation.
///
/// Generated service traits are implemented on top of it with
/// [`mock_servicer!`](crate::mock_servicer); each RPC ends up in
/// [`MockServicer::dispatch`].
#[derive(Clone)]
pub struct MockServicer {
    state: Arc<MockState>,
}

impl MockServicer {
    pub fn servicer_name(&self) -> &str {
        &self.state.servicer.name
    }

    /// Route one unary call to the handler installed in the current scope.
    ///
    /// Methods without a handler answer `UNIMPLEMENTED`.
    pub fn dispatch<Req, Resp>(
        &self,
        method: &str,
        request: Request<Req>,
    ) -> Result<Response<Resp>, Status>
    where
        Req: Clone + Send + 'static,
        Resp: Send + 'static,
    {
        let installed = lock(&self.state.methods).get(method).cloned();
        let Some(installed) = installed else {
            tracing::warn!(
                servicer = %self.state.servicer.name,
                method,
                "grpc method is not mocked"
            );
            return Err(Status::unimplemented(format!(
                "{}.{method} is not mocked",
                self.state.servicer.name
            )));
        };
        let installed = installed
            .downcast::<InstalledMethod<Req, Resp>>()
            .map_err(|_| {
                Status::internal(format!(
                    "mock for {}.{method} was installed with other message types",
                    self.state.servicer.name
                ))
            })?;
        installed.calls.push(request.get_ref().clone());
        (installed.handler)(&request).map(Response::new)
    }
}

impl fmt::Debug for MockServicer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockServicer")
            .field("servicer", &self.state.servicer.name)
            .finish()
    }
}

/// Session-lifetime mock for one servicer.
#[derive(Clone, Debug)]
pub struct GrpcMock {
    servicer: MockServicer,
}

/// Build a mock for the given capability.
pub fn create_mock(servicer: &ServicerDef) -> GrpcMock {
    GrpcMock {
        servicer: MockServicer {
            state: Arc::new(MockState {
                servicer: servicer.clone(),
                methods: Mutex::new(HashMap::new()),
                scope_lock: Arc::new(tokio::sync::Mutex::new(())),
                holder: Mutex::new(None),
                scoped: AtomicBool::new(false),
                scopes_released: AtomicUsize::new(0),
            }),
        },
    }
}

impl GrpcMock {
    /// The underlying servicer handed to the attach function.
    pub fn servicer(&self) -> MockServicer {
        self.servicer.clone()
    }

    pub fn servicer_name(&self) -> &str {
        self.servicer.servicer_name()
    }

    /// Enter a recording scope, waiting up to [`DEFAULT_SCOPE_TIMEOUT`] for
    /// another test's scope to end.
    pub async fn mock(&self) -> Result<MockScope, FixtureError> {
        self.mock_within(DEFAULT_SCOPE_TIMEOUT).await
    }

    /// Enter a recording scope, waiting at most `timeout`.
    ///
    /// Fails with [`FixtureError::ScopeAlreadyHeld`] when the calling thread
    /// already holds this mock's scope, and with [`FixtureError::ScopeTimeout`]
    /// when another test keeps it longer than `timeout`.
    pub async fn mock_within(&self, timeout: Duration) -> Result<MockScope, FixtureError> {
        let state = &self.servicer.state;
        state.check_reentry()?;
        let guard = tokio::time::timeout(timeout, Arc::clone(&state.scope_lock).lock_owned())
            .await
            .map_err(|_| state.timed_out(timeout))?;
        Ok(MockScope::enter(Arc::clone(state), guard))
    }

    /// Blocking variant of [`GrpcMock::mock`] for synchronous tests.
    pub fn mock_blocking(&self) -> Result<MockScope, FixtureError> {
        self.mock_blocking_within(DEFAULT_SCOPE_TIMEOUT)
    }

    /// Blocking variant of [`GrpcMock::mock_within`]; parks the calling
    /// thread while waiting.
    pub fn mock_blocking_within(&self, timeout: Duration) -> Result<MockScope, FixtureError> {
        let state = &self.servicer.state;
        state.check_reentry()?;
        let deadline = Instant::now() + timeout;
        loop {
            match Arc::clone(&state.scope_lock).try_lock_owned() {
                Ok(guard) => return Ok(MockScope::enter(Arc::clone(state), guard)),
                Err(_) if Instant::now() >= deadline => return Err(state.timed_out(timeout)),
                Err(_) => std::thread::sleep(SCOPE_POLL_INTERVAL),
            }
        }
    }

    /// Whether a test currently holds a scope on this mock.
    pub fn is_scoped(&self) -> bool {
        self.servicer.state.scoped.load(Ordering::SeqCst)
    }

    pub fn scopes_released(&self) -> usize {
        self.servicer.state.scopes_released.load(Ordering::SeqCst)
    }

    pub fn installed_methods(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.servicer.state.methods).keys().cloned().collect();
        names.sort();
        names
    }
}

/// One test's view of a [`GrpcMock`].
///
/// Dropping the scope, on any exit path, removes every installed handler.
pub struct MockScope {
    state: Arc<MockState>,
    _guard: OwnedMutexGuard<()>,
}

impl MockScope {
    fn enter(state: Arc<MockState>, guard: OwnedMutexGuard<()>) -> Self {
        lock(&state.methods).clear();
        *lock(&state.holder) = Some(std::thread::current().id());
        state.scoped.store(true, Ordering::SeqCst);
        tracing::debug!(servicer = %state.servicer.name, "mock scope entered");
        Self {
            state,
            _guard: guard,
        }
    }

    /// Install `handler` for `method` and return the queue of its calls.
    ///
    /// Installing again for the same method replaces the handler and starts a
    /// new queue.
    pub fn install<Req, Resp, F>(
        &self,
        method: &str,
        handler: F,
    ) -> Result<CallQueue<Req>, FixtureError>
    where
        Req: Clone + Send + 'static,
        Resp: Send + 'static,
        F: Fn(&Request<Req>) -> Result<Resp, Status> + Send + Sync + 'static,
    {
        if !self.state.servicer.has_method(method) {
            return Err(FixtureError::UnknownMethod {
                servicer: self.state.servicer.name.clone(),
                method: method.to_owned(),
            });
        }
        let calls = CallQueue::new();
        let installed: ErasedMethod = Arc::new(InstalledMethod {
            handler: Box::new(handler),
            calls: calls.clone(),
        });
        lock(&self.state.methods).insert(method.to_owned(), installed);
        tracing::debug!(servicer = %self.state.servicer.name, method, "grpc method mocked");
        Ok(calls)
    }

    pub fn servicer_name(&self) -> &str {
        &self.state.servicer.name
    }
}

impl Drop for MockScope {
    fn drop(&mut self) {
        lock(&self.state.methods).clear();
        *lock(&self.state.holder) = None;
        self.state.scoped.store(false, Ordering::SeqCst);
        self.state.scopes_released.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(servicer = %self.state.servicer.name, "mock scope released");
    }
}

impl fmt::Debug for MockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockScope")
            .field("servicer", &self.state.servicer.name)
            .finish()
    }
}
