use std::sync::Arc;
use std::time::Duration;

/// Failures raised while building or using mock gRPC fixtures.
///
/// Nothing in the fixture layer catches or retries these; they surface as the
/// failure of the test that requested the fixture.
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("don't know what servicer to choose: {candidates:?}")]
    AmbiguousServicer { candidates: Vec<String> },
    #[error("service module `{module}` has no member `{name}`")]
    MissingMember { module: String, name: String },
    #[error("member `{name}` of service module `{module}` is not a servicer")]
    NotAServicer { module: String, name: String },
    #[error("service module `{module}` has no attach function `{name}`")]
    MissingAttach { module: String, name: String },
    #[error("trying to mock unknown grpc method `{method}` of `{servicer}`")]
    UnknownMethod { servicer: String, method: String },
    #[error("`{servicer}` mock is already scoped by this test")]
    ScopeAlreadyHeld { servicer: String },
    #[error("timed out after {timeout:?} waiting for the `{servicer}` mock scope")]
    ScopeTimeout { servicer: String, timeout: Duration },
    #[error("service `{service}` is already attached to the mock server")]
    ServiceAlreadyAttached { service: String },
    #[error("fixture `{0}` is already registered")]
    DuplicateFixture(String),
    #[error("fixture `{0}` is not registered")]
    UnknownFixture(String),
    #[error("session fixture `{fixture}` failed: {source}")]
    SessionSetup {
        fixture: String,
        #[source]
        source: Arc<FixtureError>,
    },
    #[error("service config has no `{0}`")]
    ConfigPath(String),
    #[error("config hook `{name}` failed")]
    Hook {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid endpoint `{0}`")]
    InvalidEndpoint(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl FixtureError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AmbiguousServicer { .. } => "AMBIGUOUS_SERVICER",
            Self::MissingMember { .. } => "MISSING_MEMBER",
            Self::NotAServicer { .. } => "NOT_A_SERVICER",
            Self::MissingAttach { .. } => "MISSING_ATTACH",
            Self::UnknownMethod { .. } => "UNKNOWN_METHOD",
            Self::ScopeAlreadyHeld { .. } => "SCOPE_ALREADY_HELD",
            Self::ScopeTimeout { .. } => "SCOPE_TIMEOUT",
            Self::ServiceAlreadyAttached { .. } => "SERVICE_ALREADY_ATTACHED",
            Self::DuplicateFixture(_) => "DUPLICATE_FIXTURE",
            Self::UnknownFixture(_) => "UNKNOWN_FIXTURE",
            Self::SessionSetup { .. } => "SESSION_SETUP",
            Self::ConfigPath(_) => "CONFIG_PATH",
            Self::Hook { .. } => "HOOK",
            Self::InvalidEndpoint(_) => "INVALID_ENDPOINT",
            Self::Io(_) => "IO",
            Self::Transport(_) => "TRANSPORT",
        }
    }

    /// The error that started it all, looking through session setup wrappers.
    pub fn root_cause(&self) -> &FixtureError {
        match self {
            Self::SessionSetup { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Wrap a memoized construction failure for one more dependent request.
    pub fn session_setup(fixture: impl Into<String>, source: &Arc<FixtureError>) -> Self {
        Self::SessionSetup {
            fixture: fixture.into(),
            source: Arc::clone(source),
        }
    }
}
