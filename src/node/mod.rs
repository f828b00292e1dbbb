mod builder;
mod node;
mod type_config;

pub use builder::*;
pub use node::*;
pub use type_config::*;

#[cfg(test)]
mod node_test;
