//! Backend worker: a dedicated thread running the council client on its own runtime.

pub mod commands;
pub mod runtime;
