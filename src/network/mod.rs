//! Network layer: gateway, connection lifecycle, and connection caps.

mod connection;
mod gateway;
mod limit;

pub use connection::Connection;
pub use gateway::Gateway;
pub use limit::ConnectionLimit;
