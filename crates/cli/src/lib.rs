//! Command-line and HTTP front end for the antenna bridge.

pub mod app;
pub mod banner;
pub mod cli;
pub mod logging;
pub mod server;
