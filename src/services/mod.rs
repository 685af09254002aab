//! Background services a session runs while open.

pub mod connection;

pub use connection::{ConnectionManager, ConnectionState};
