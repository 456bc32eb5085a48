//! CLI command implementations.

pub mod info;
pub mod list;
pub mod purge;
pub mod validate;
