pub mod data;
pub mod io;

pub use data::{Config, ResolvedConfig};
pub use io::ConfigError;
