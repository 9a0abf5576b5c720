//! A static HTTP responder.
//!
//! Every request gets `200 OK`, `Content-Type: text/html` and `<h1>Hello, World!</h1>`,
//! whatever its method, path, headers or body.
//!
//! One thread accepts connections, one thread polls socket readiness (the [`reactor`]), and a
//! fixed pool of worker threads (the [`executor`]) runs one task per connection, with HTTP/1.1
//! handled by hyper. At most `max_connections` connections are served at a time; connections
//! beyond that are shut down as soon as they are accepted.

mod config;
mod error;
pub mod executor;
mod handler;
pub mod reactor;
mod server;

pub use config::Config;
pub use error::{Error, Result};
pub use handler::{fixed_response, hello_world, BODY, HTML};
pub use server::Server;
