#![forbid(unsafe_code)]

pub mod cli;
pub mod error;
pub mod routes;
pub mod server;
pub mod source;
