//! Configuration file handling
//!
//! - `format`: serde schema of the YAML document
//! - `parser`: parsing, validation and pool selection

pub mod format;
pub mod parser;

pub use format::ConfigFile;
pub use parser::{load_pool, parse_config_file, parse_config_str, select_pool};
