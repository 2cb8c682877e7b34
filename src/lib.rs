pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod issuance;
pub mod logging;
pub mod storage;

pub use error::{Error, Result};
