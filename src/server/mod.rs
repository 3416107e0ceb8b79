mod http;

pub use http::{Server, router, status_for};
