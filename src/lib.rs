pub mod cache;
pub mod config;
pub mod db;
pub mod dump;
pub mod error;
pub mod graph;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod store;

pub use config::Config;
pub use dump::{dump, DumpOutput, DumpRequest};
pub use error::{DumpError, Result};
