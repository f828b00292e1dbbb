//! Helpers shared by the unit tests of every module
mod common;
mod entry_builder;
mod mock_context;
mod mock_type_config;

pub use common::*;
pub use entry_builder::*;
pub(crate) use mock_context::*;
pub use mock_type_config::*;
