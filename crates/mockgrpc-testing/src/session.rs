//! Test session: the shared mock server plus a registry of mock fixtures by
//! name.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use mockgrpc_core::{FixtureError, MockServerConfig};

use crate::fixture::{MockFixture, MockGrpcFixtures, MockSessionFixture, make_mock_grpc};
use crate::mock::{GrpcMock, MockScope};
use crate::server::GrpcMockServer;
use crate::servicer::ServiceModule;

/// Name under which session setup failures of the mock server are reported.
pub const MOCKSERVER_FIXTURE: &str = "grpc_mockserver";

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, Arc<MockSessionFixture>>,
    mocks: HashMap<String, MockFixture>,
}

impl Registry {
    fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name) || self.mocks.contains_key(name)
    }
}

/// Everything that lives for one test session.
///
/// Dropping the session stops its mock server.
pub struct Session {
    config: MockServerConfig,
    mockserver: OnceLock<Result<GrpcMockServer, Arc<FixtureError>>>,
    registry: RwLock<Registry>,
}

static GLOBAL: OnceLock<Session> = OnceLock::new();

impl Session {
    pub fn new(config: MockServerConfig) -> Self {
        Self {
            config,
            mockserver: OnceLock::new(),
            registry: RwLock::new(Registry::default()),
        }
    }

    /// Process-wide session shared by every test in the binary.
    ///
    /// Configured from `GRPC_MOCKSERVER_*` environment variables.
    pub fn global() -> &'static Session {
        GLOBAL.get_or_init(|| {
            mockgrpc_core::tracing::init_test_tracing();
            Session::new(MockServerConfig::from_env())
        })
    }

    pub fn config(&self) -> &MockServerConfig {
        &self.config
    }

    /// The session's mock server, started on first use.
    pub fn grpc_mockserver(&self) -> Result<GrpcMockServer, FixtureError> {
        let server = self
            .mockserver
            .get_or_init(|| GrpcMockServer::start(&self.config).map_err(Arc::new));
        match server {
            Ok(server) => Ok(server.clone()),
            Err(cause) => Err(FixtureError::session_setup(MOCKSERVER_FIXTURE, cause)),
        }
    }

    /// Register a fixture pair; returns the per-test fixture.
    pub fn register(&self, fixtures: MockGrpcFixtures) -> Result<MockFixture, FixtureError> {
        let MockGrpcFixtures { mock, session } = fixtures;
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        for name in [mock.name(), session.name()] {
            if registry.contains(name) || name == MOCKSERVER_FIXTURE {
                return Err(FixtureError::DuplicateFixture(name.to_owned()));
            }
        }
        registry
            .sessions
            .insert(session.name().to_owned(), Arc::new(session));
        registry.mocks.insert(mock.name().to_owned(), mock.clone());
        tracing::debug!(fixture = %mock.name(), "mock fixture registered");
        Ok(mock)
    }

    /// [`make_mock_grpc`] and [`Session::register`] in one step.
    pub fn make_mock_grpc(
        &self,
        module: impl Into<Arc<ServiceModule>>,
        fixture_name: &str,
        servicer: Option<&str>,
    ) -> Result<MockFixture, FixtureError> {
        self.register(make_mock_grpc(module, fixture_name, servicer))
    }

    pub fn session_fixture(&self, name: &str) -> Result<Arc<MockSessionFixture>, FixtureError> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry
            .sessions
            .get(name)
            .cloned()
            .ok_or_else(|| FixtureError::UnknownFixture(name.to_owned()))
    }

    pub fn fixture(&self, name: &str) -> Result<MockFixture, FixtureError> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry
            .mocks
            .get(name)
            .cloned()
            .ok_or_else(|| FixtureError::UnknownFixture(name.to_owned()))
    }

    /// Value of the session fixture `name`, installing it if needed.
    pub fn request_session(&self, name: &str) -> Result<GrpcMock, FixtureError> {
        let fixture = self.session_fixture(name)?;
        let server = self.grpc_mockserver()?;
        fixture.get(&server)
    }

    /// Value of the per-test fixture `name`: a fresh recording scope.
    pub async fn request(&self, name: &str) -> Result<MockScope, FixtureError> {
        self.fixture(name)?.acquire(self).await
    }

    /// Registered fixture names, sorted.
    pub fn fixture_names(&self) -> Vec<String> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = registry
            .sessions
            .keys()
            .chain(registry.mocks.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("fixtures", &self.fixture_names())
            .finish()
    }
}
