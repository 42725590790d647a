pub mod connection;
pub mod tls;

pub use connection::{Connection, ConnectionError, TransportMode};
pub use tls::{ClientTls, ServerIdentity, TlsError};
