//! Facade layer abstractions for protocol framing and connection parser state.

pub mod connection;
pub mod protocol;
