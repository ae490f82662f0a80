//! Command implementations for the pipe CLI

pub mod check;
pub mod send;
