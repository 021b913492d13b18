//! Protobuf services used to exercise the mock fixtures over a real channel.

pub mod greeter {
    tonic::include_proto!("greeter");
}

pub mod catalog {
    tonic::include_proto!("catalog");
}
