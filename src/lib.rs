pub mod catalog;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod export;
pub mod logging;

pub use error::{Error, Result};
