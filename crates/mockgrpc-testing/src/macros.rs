/// Implement a tonic-generated service trait on top of a [`MockServicer`].
///
/// Generates a newtype around [`MockServicer`], a `METHODS` list with the
/// proto method names (the mock's capability), a `From<MockServicer>` impl
/// for use in attach functions, and the trait impl forwarding every unary
/// RPC to [`MockServicer::dispatch`].
///
/// ```ignore
/// mockgrpc_testing::mock_servicer! {
///     pub struct GreeterMock: greeter_server::Greeter {
///         "SayHello" => fn say_hello(HelloRequest) -> HelloReply;
///         "SayGoodbye" => fn say_goodbye(GoodbyeRequest) -> GoodbyeReply;
///     }
/// }
/// ```
///
/// [`MockServicer`]: crate::MockServicer
/// [`MockServicer::dispatch`]: crate::MockServicer::dispatch
#[macro_export]
macro_rules! mock_servicer {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident: $service:path {
            $( $method:literal => fn $fn_name:ident($req:ty) -> $resp:ty; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $name($crate::MockServicer);

        impl $name {
            pub const METHODS: &'static [&'static str] = &[$($method),*];
        }

        impl ::std::convert::From<$crate::MockServicer> for $name {
            fn from(servicer: $crate::MockServicer) -> Self {
                Self(servicer)
            }
        }

        #[$crate::__private::tonic::async_trait]
        impl $service for $name {
            $(
                async fn $fn_name(
                    &self,
                    request: $crate::__private::tonic::Request<$req>,
                ) -> ::std::result::Result<
                    $crate::__private::tonic::Response<$resp>,
                    $crate::__private::tonic::Status,
                > {
                    self.0.dispatch($method, request)
                }
            )*
        }
    };
}
