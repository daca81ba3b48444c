mod binary;
mod json;

pub use binary::*;
pub use json::*;

/// On-disk representations understood by the settings store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Binary,
}
