pub mod config;
pub mod error;
pub mod fs;
pub mod remote;
pub mod sanitize;
pub mod state;
pub mod templates;

pub use error::{FsError, Result};
