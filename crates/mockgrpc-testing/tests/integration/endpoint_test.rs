use mockgrpc_proto::greeter::greeter_client::GreeterClient;
use mockgrpc_proto::greeter::{HelloReply, HelloRequest};
use mockgrpc_testing::endpoint::{
    ConfigHooks, UnixSocketPath, grpc_service_endpoint, prepare_service_config, unix_channel,
};
use mockgrpc_testing::{FixtureError, ListenAddr, MockServerConfig, Session};
use serde_json::json;
use tonic::Request;

use crate::helpers::{greeter_module, hello};

fn service_config() -> serde_json::Value {
    json!({
        "components_manager": {
            "components": {
                "grpc-server": { "port": 8091 },
                "handler-greeter": { "path": "/greet" }
            }
        }
    })
}

#[test]
fn should_patch_service_config_through_hooks() {
    let socket = UnixSocketPath::new().unwrap();
    let hooks = ConfigHooks::new().with_hook(
        "prepare_service_config",
        prepare_service_config(socket.path()),
    );
    let mut config = service_config();

    hooks.apply(&mut config, &json!({})).unwrap();

    assert_eq!(
        grpc_service_endpoint(&config).unwrap(),
        format!("unix:{}", socket.path().display())
    );
    assert_eq!(
        config["components_manager"]["components"]["grpc-server"]["port"],
        json!(8091)
    );
}

#[test]
fn should_name_failing_hook() {
    let hooks = ConfigHooks::new()
        .with_hook("prepare_service_config", prepare_service_config("/tmp/unused"));
    let mut config = json!({ "components_manager": {} });

    let err = hooks.apply(&mut config, &json!({})).unwrap_err();

    assert!(
        matches!(err, FixtureError::Hook { ref name, .. } if name == "prepare_service_config"),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn should_serve_mock_over_unix_socket() {
    let socket = UnixSocketPath::new().unwrap();
    let session = Session::new(MockServerConfig::unix(socket.path()));
    let fixture = session
        .make_mock_grpc(greeter_module(), "mock_greeter", None)
        .unwrap();
    let mock = fixture.acquire(&session).await.unwrap();
    let calls = mock
        .install("SayHello", |req: &Request<HelloRequest>| {
            Ok(HelloReply {
                message: format!("unix hello, {}", req.get_ref().name),
            })
        })
        .unwrap();

    let server = session.grpc_mockserver().unwrap();
    assert_eq!(
        server.listen_addr(),
        &ListenAddr::Unix(socket.path().to_path_buf())
    );
    assert_eq!(server.endpoint(), format!("unix:{}", socket.path().display()));

    let reply = GreeterClient::new(unix_channel(socket.path()).unwrap())
        .say_hello(hello("socket"))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.message, "unix hello, socket");

    let reply = GreeterClient::new(server.channel().unwrap())
        .say_hello(hello("channel"))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.message, "unix hello, channel");

    assert_eq!(calls.times_called(), 2);
}

#[tokio::test]
async fn should_connect_client_stub_to_patched_service_endpoint() {
    let socket = UnixSocketPath::new().unwrap();
    let mut config = service_config();
    ConfigHooks::new()
        .with_hook("prepare_service_config", prepare_service_config(socket.path()))
        .apply(&mut config, &json!({}))
        .unwrap();

    // The mock stands in for the service under test, listening where the
    // patched config says the service listens.
    let endpoint = grpc_service_endpoint(&config).unwrap();
    let path = endpoint.strip_prefix("unix:").unwrap();
    let session = Session::new(MockServerConfig::unix(path));
    let fixture = session
        .make_mock_grpc(greeter_module(), "mock_greeter", None)
        .unwrap();
    let mock = fixture.acquire(&session).await.unwrap();
    mock.install("SayHello", |_: &Request<HelloRequest>| {
        Ok(HelloReply {
            message: "patched".to_owned(),
        })
    })
    .unwrap();

    let reply = GreeterClient::new(unix_channel(path).unwrap())
        .say_hello(hello("stub"))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(reply.message, "patched");
}

#[tokio::test]
async fn should_reuse_socket_path_left_behind_by_previous_run() {
    let socket = UnixSocketPath::new().unwrap();
    // A previous run's listener that went away without unlinking its file.
    drop(std::os::unix::net::UnixListener::bind(socket.path()).unwrap());

    let session = Session::new(MockServerConfig::unix(socket.path()));
    let fixture = session
        .make_mock_grpc(greeter_module(), "mock_greeter", None)
        .unwrap();
    let mock = fixture.acquire(&session).await.unwrap();
    mock.install("SayHello", |_: &Request<HelloRequest>| {
        Ok(HelloReply {
            message: "fresh".to_owned(),
        })
    })
    .unwrap();

    let reply = GreeterClient::new(unix_channel(socket.path()).unwrap())
        .say_hello(hello("again"))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(reply.message, "fresh");
}
