extern crate chrono;
extern crate log;
extern crate rustls;
extern crate rustls_pki_types;

pub mod cli;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod logger;
pub mod proxy;
