pub mod app;
pub mod commands;
pub mod config;
pub mod db;
pub mod errors;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;

pub use app::AppContext;
pub use errors::{LibraryError, Result};
