//! Core keyspace and command-dispatch abstractions shared by the server layer.

pub mod command;
pub mod containers;
pub mod dispatch;
pub mod keyspace;
pub mod value;
