//! Application-level error reporting shared by the CLI and the HTTP front.

pub mod error;
