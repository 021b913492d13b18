use std::sync::Barrier;
use std::time::Duration;

use mockgrpc_proto::greeter::{GoodbyeReply, GoodbyeRequest, HelloReply, HelloRequest};
use mockgrpc_testing::{FixtureError, MockFixture, MockServerConfig, Session};
use tonic::{Code, Request, Status};

use crate::helpers::{
    counter, greeter_client, greeter_module, hello, multi_service_module, test_session,
};

/// Runs one "test" on its own thread and runtime: take `first`, meet the
/// other test at `barrier`, then take `second`.
fn take_in_order(
    session: &Session,
    barrier: &Barrier,
    first: &MockFixture,
    second: &MockFixture,
) -> Result<(), FixtureError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let _first = first.acquire(session).await?;
        barrier.wait();
        let _second = second.acquire(session).await?;
        Ok(())
    })
}

#[tokio::test]
async fn should_start_each_test_with_a_clean_mock() {
    let session = test_session();
    let fixture = session
        .make_mock_grpc(greeter_module(), "mock_greeter", None)
        .unwrap();
    let mut client = greeter_client(&session);

    // Test A: mocks SayHello and calls it.
    {
        let mock = fixture.acquire(&session).await.unwrap();
        let calls = mock
            .install("SayHello", |_: &Request<HelloRequest>| {
                Ok(HelloReply {
                    message: "from test a".to_owned(),
                })
            })
            .unwrap();
        client.say_hello(hello("a")).await.unwrap();
        assert_eq!(calls.times_called(), 1);
    }

    // Test B: sees neither the handler nor the recorded call.
    let mock = fixture.acquire(&session).await.unwrap();
    let goodbyes = mock
        .install("SayGoodbye", |req: &Request<GoodbyeRequest>| {
            Ok(GoodbyeReply {
                message: format!("bye, {}", req.get_ref().name),
            })
        })
        .unwrap();
    assert_eq!(goodbyes.times_called(), 0);

    let status = client.say_hello(hello("b")).await.unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);

    let mock_handle = session.request_session("mock_greeter_session").unwrap();
    assert_eq!(mock_handle.installed_methods(), vec!["SayGoodbye".to_owned()]);
    assert_eq!(mock_handle.scopes_released(), 1);
}

#[tokio::test]
async fn should_release_scope_when_test_body_panics() {
    let session = test_session();
    let fixture = session
        .make_mock_grpc(greeter_module(), "mock_greeter", None)
        .unwrap();
    let mock = fixture.acquire(&session).await.unwrap();
    let handle = session.request_session("mock_greeter_session").unwrap();

    let body = tokio::spawn(async move {
        mock.install("SayHello", |_: &Request<HelloRequest>| {
            Err::<HelloReply, _>(Status::internal("boom"))
        })
        .unwrap();
        panic!("test body failed");
    });

    assert!(body.await.unwrap_err().is_panic());
    assert!(!handle.is_scoped());
    assert!(handle.installed_methods().is_empty());
    assert_eq!(handle.scopes_released(), 1);

    let next = tokio::time::timeout(Duration::from_secs(5), fixture.acquire(&session))
        .await
        .expect("scope was not released")
        .unwrap();
    assert_eq!(next.servicer_name(), "GreeterServicer");
}

#[tokio::test]
async fn should_release_scope_when_handler_returns_error() {
    let session = test_session();
    let fixture = session
        .make_mock_grpc(greeter_module(), "mock_greeter", None)
        .unwrap();

    let status = {
        let mock = fixture.acquire(&session).await.unwrap();
        mock.install("SayHello", |_: &Request<HelloRequest>| {
            Err::<HelloReply, _>(Status::not_found("no such greeting"))
        })
        .unwrap();
        greeter_client(&session)
            .say_hello(hello("x"))
            .await
            .unwrap_err()
    };

    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(status.message(), "no such greeting");
    let handle = session.request_session("mock_greeter_session").unwrap();
    assert!(!handle.is_scoped());
    assert_eq!(handle.scopes_released(), 1);
}

#[tokio::test]
async fn should_reject_methods_the_servicer_does_not_define() {
    let session = test_session();
    let fixture = session
        .make_mock_grpc(greeter_module(), "mock_greeter", None)
        .unwrap();
    let mock = fixture.acquire(&session).await.unwrap();

    let err = mock
        .install("SayNothing", |_: &Request<HelloRequest>| {
            Ok(HelloReply::default())
        })
        .unwrap_err();

    assert!(
        matches!(
            err,
            FixtureError::UnknownMethod { ref servicer, ref method }
                if servicer == "GreeterServicer" && method == "SayNothing"
        ),
        "unexpected error: {err:?}"
    );
}

#[test]
fn should_acquire_scope_from_sync_test() {
    let session = test_session();
    let fixture = session
        .make_mock_grpc(greeter_module(), "mock_greeter", None)
        .unwrap();

    let mock = fixture.acquire_blocking(&session).unwrap();
    let calls = mock
        .install("SayHello", |_: &Request<HelloRequest>| {
            Ok(HelloReply {
                message: "sync".to_owned(),
            })
        })
        .unwrap();
    assert_eq!(calls.times_called(), 0);
    drop(mock);

    let handle = session.request_session("mock_greeter_session").unwrap();
    assert!(handle.installed_methods().is_empty());
    assert_eq!(handle.scopes_released(), 1);
}

#[test]
fn should_not_hang_when_parallel_tests_take_mocks_in_opposite_order() {
    let session = Session::new(MockServerConfig {
        scope_timeout: Duration::from_millis(300),
        ..MockServerConfig::default()
    });
    let greeter = session
        .make_mock_grpc(greeter_module(), "mock_greeter", None)
        .unwrap();
    let catalog = session
        .make_mock_grpc(
            multi_service_module(counter(), counter()),
            "mock_catalog",
            Some("CatalogServicer"),
        )
        .unwrap();
    let barrier = Barrier::new(2);

    let (a, b) = std::thread::scope(|scope| {
        let a = scope.spawn(|| take_in_order(&session, &barrier, &greeter, &catalog));
        let b = scope.spawn(|| take_in_order(&session, &barrier, &catalog, &greeter));
        (a.join().unwrap(), b.join().unwrap())
    });

    let errors: Vec<FixtureError> = [a, b].into_iter().filter_map(Result::err).collect();
    assert!(!errors.is_empty(), "one of the two tests must give up waiting");
    for err in &errors {
        assert_eq!(err.kind(), "SCOPE_TIMEOUT", "unexpected error: {err:?}");
    }
    let handle = session.request_session("mock_greeter_session").unwrap();
    assert!(!handle.is_scoped());
}

#[tokio::test]
async fn should_refuse_second_request_of_same_fixture_in_one_test() {
    let session = test_session();
    let fixture = session
        .make_mock_grpc(greeter_module(), "mock_greeter", None)
        .unwrap();
    let first = fixture.acquire(&session).await.unwrap();

    let again = tokio::time::timeout(Duration::from_secs(5), fixture.acquire(&session))
        .await
        .expect("second request must not wait on its own scope");

    assert!(
        matches!(
            again,
            Err(FixtureError::ScopeAlreadyHeld { ref servicer }) if servicer == "GreeterServicer"
        ),
        "unexpected result: {again:?}"
    );
    assert_eq!(first.servicer_name(), "GreeterServicer");

    drop(first);
    assert!(fixture.acquire(&session).await.is_ok());
}
