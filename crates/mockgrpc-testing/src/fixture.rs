//! Mock gRPC fixture factory.
//!
//! [`make_mock_grpc`] turns a service module into two fixtures:
//!
//! - `<name>_session`: installs a mock of the module's servicer into the
//!   session's mock server, once, on first use;
//! - `<name>`: per test, opens a [`MockScope`] on that mock so expectations
//!   never leak from one test into the next.
//!
//! # Example
//! ```no_run
//! # use std::sync::LazyLock;
//! # use mockgrpc_testing::{MockFixture, ServiceModule, Session};
//! # fn greeter_module() -> ServiceModule { unimplemented!() }
//! static GREETER: LazyLock<MockFixture> = LazyLock::new(|| {
//!     Session::global()
//!         .make_mock_grpc(greeter_module(), "mock_greeter", None)
//!         .expect("register greeter mock")
//! });
//!
//! # async fn test() -> Result<(), mockgrpc_testing::FixtureError> {
//! let mock = GREETER.acquire(Session::global()).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, OnceLock};

use mockgrpc_core::FixtureError;

use crate::mock::{GrpcMock, MockScope, create_mock};
use crate::server::GrpcMockServer;
use crate::servicer::{ServiceModule, guess_servicer};
use crate::session::Session;

/// Name of the session fixture backing the per-test fixture `fixture_name`.
pub fn session_fixture_name(fixture_name: &str) -> String {
    format!("{fixture_name}_session")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconstructed,
    Installed,
    Failed,
}

/// Session-lifetime fixture owning one installed mock.
pub struct MockSessionFixture {
    name: String,
    module: Arc<ServiceModule>,
    servicer: Option<String>,
    installed: OnceLock<Result<GrpcMock, Arc<FixtureError>>>,
}

impl MockSessionFixture {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        match self.installed.get() {
            None => SessionState::Unconstructed,
            Some(Ok(_)) => SessionState::Installed,
            Some(Err(_)) => SessionState::Failed,
        }
    }

    /// The installed mock, constructing it on the first call.
    ///
    /// Construction runs at most once per fixture. A failure is kept and
    /// handed to every later caller; it is never retried.
    pub fn get(&self, server: &GrpcMockServer) -> Result<GrpcMock, FixtureError> {
        let installed = self.installed.get_or_init(|| {
            self.install(server).map_err(|e| {
                tracing::error!(fixture = %self.name, error = %e, "mock session fixture failed");
                Arc::new(e)
            })
        });
        match installed {
            Ok(mock) => Ok(mock.clone()),
            Err(cause) => Err(FixtureError::session_setup(&self.name, cause)),
        }
    }

    fn install(&self, server: &GrpcMockServer) -> Result<GrpcMock, FixtureError> {
        let servicer = match &self.servicer {
            Some(servicer) => servicer.clone(),
            None => guess_servicer(&self.module)?,
        };
        let def = self.module.servicer(&servicer)?;
        let mock = create_mock(def);
        let attach = self.module.attach_fn(&servicer)?;
        attach(mock.servicer(), server)?;
        tracing::info!(
            fixture = %self.name,
            module = %self.module.name(),
            servicer = %servicer,
            "grpc mock installed"
        );
        Ok(mock)
    }
}

impl std::fmt::Debug for MockSessionFixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSessionFixture")
            .field("name", &self.name)
            .field("module", &self.module.name())
            .field("servicer", &self.servicer)
            .field("state", &self.state())
            .finish()
    }
}

/// Per-test fixture; resolves its session fixture by name on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockFixture {
    name: String,
    session_name: String,
}

impl MockFixture {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session_fixture_name(&self) -> &str {
        &self.session_name
    }

    /// Enter this test's recording scope on the session mock.
    ///
    /// Hold the returned scope for the whole test body; dropping it releases
    /// every expectation. Requesting the fixture again while the scope is
    /// held fails with [`FixtureError::ScopeAlreadyHeld`]; waiting on another
    /// test is bounded by the session's `scope_timeout`.
    pub async fn acquire(&self, session: &Session) -> Result<MockScope, FixtureError> {
        let mock = session.request_session(&self.session_name)?;
        mock.mock_within(session.config().scope_timeout).await
    }

    /// [`MockFixture::acquire`] for synchronous tests.
    pub fn acquire_blocking(&self, session: &Session) -> Result<MockScope, FixtureError> {
        let mock = session.request_session(&self.session_name)?;
        mock.mock_blocking_within(session.config().scope_timeout)
    }
}

/// The fixture pair built by [`make_mock_grpc`].
#[derive(Debug)]
pub struct MockGrpcFixtures {
    pub mock: MockFixture,
    pub session: MockSessionFixture,
}

/// Build the per-test and session fixtures for `module`.
///
/// `servicer` overrides the servicer otherwise guessed from the module's
/// member names. Nothing is resolved until the session fixture is first used.
pub fn make_mock_grpc(
    module: impl Into<Arc<ServiceModule>>,
    fixture_name: &str,
    servicer: Option<&str>,
) -> MockGrpcFixtures {
    let session_name = session_fixture_name(fixture_name);
    MockGrpcFixtures {
        mock: MockFixture {
            name: fixture_name.to_owned(),
            session_name: session_name.clone(),
        },
        session: MockSessionFixture {
            name: session_name,
            module: module.into(),
            servicer: servicer.map(str::to_owned),
            installed: OnceLock::new(),
        },
    }
}
