
#[cfg(unix)]
mod endpoint_test;
mod isolation_test;
