pub mod bf_lists;
pub mod bf_maps;
pub mod bf_num;
pub mod bf_server;
pub mod bf_strings;
pub mod bf_values;
pub mod bf_world;
pub mod builtin;
pub mod context;
pub mod execute;

#[cfg(test)]
mod vm_test;

pub use context::{Context, Limits, Unwind};
pub use execute::Engine;
