mod auth;
mod client;
mod connection;
mod error;
mod session;
#[cfg(test)]
pub(crate) mod testing;

pub use connection::*;
pub use error::*;
pub use session::*;
