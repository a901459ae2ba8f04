//! File context resolution.
//!
//! Turns a heterogeneous list of file, directory and glob specs into an ordered,
//! deduplicated, byte-bounded sequence of [`ContextFragment`]s. The resolver is read-only with
//! respect to the filesystem and keeps no state between calls.

pub mod error;
pub mod filters;
pub mod fragment;
pub mod relevance;
pub mod resolver;
pub mod scanner;
pub mod spec;

pub use error::{ContextError, Result};
pub use fragment::{ContextFragment, Resolution, ResolveWarning, WarningReason};
pub use resolver::{resolve, ResolveOptions, DEFAULT_BUDGET_BYTES, DEFAULT_MAX_FILE_BYTES};
pub use spec::{ContextCategory, ContextSpec, ContextSpecInput, LineRange};
