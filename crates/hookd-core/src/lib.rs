pub mod auth;
pub mod config;
pub mod error;
pub mod procedure;
pub mod runner;
pub mod serialize;

pub use error::{HookdError, Result};
