//! Mock gRPC fixtures for integration tests.
//!
//! Provides the shared in-process mock server, mock servicers with per-test
//! recording scopes, the `make_mock_grpc` fixture factory, and endpoint glue
//! for services under test.
//! Import in `#[cfg(test)]` blocks and test crates only, never in production code.

mod macros;

pub mod endpoint;
pub mod fixture;
pub mod mock;
pub mod server;
pub mod servicer;
pub mod session;

pub use fixture::{MockFixture, MockGrpcFixtures, MockSessionFixture, SessionState, make_mock_grpc};
pub use mock::{CallQueue, GrpcMock, MockScope, MockServicer, create_mock};
pub use mockgrpc_core::{FixtureError, ListenAddr, MockServerConfig};
pub use server::GrpcMockServer;
pub use servicer::{ServiceModule, ServicerDef, attach_fn_name, guess_servicer};
pub use session::Session;

#[doc(hidden)]
pub mod __private {
    pub use tonic;
}
