//! Network front end: listener, TLS, and the ping ticker.

mod gateway;
mod tls;

pub use gateway::Gateway;
pub use tls::load_acceptor;
