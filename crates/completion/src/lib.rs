//! kfzf completion: candidates for an in-progress kubectl command and translation of the
//! selected candidate back into command-line text.

#![forbid(unsafe_code)]

pub mod engine;
pub mod format;
pub mod parse;
pub mod results;

use kfzf_fetcher::FetchError;

pub use engine::{resource_rows, tag_header, tag_occurrences, CompletionEngine, CompletionResult, Occurrence, TagType};
pub use format::{format_completion, format_stats};
pub use parse::{check_flag_managed, parse_flag_and_resource, parse_namespace_from_args, prepare_cmd_args, resource_type_for, FlagCompletion};
pub use results::process_result;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("unmanaged flag in '{0}'")]
    UnmanagedFlag(String),
    #[error("unknown resource type in '{0}'")]
    UnknownResource(String),
    #[error("no label or field selector completion on api resources")]
    NoOccurrenceOnApiResources,
    #[error("selected row should have at least two fields, got '{0}'")]
    InvalidResult(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl CompletionError {
    /// The shell should fall back to its own completion.
    pub fn is_fallthrough(&self) -> bool { matches!(self, CompletionError::UnmanagedFlag(_) | CompletionError::UnknownResource(_)) }
}
