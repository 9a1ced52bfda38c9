//! GAIA engine: the object world, the G language, and the input pipeline.
//!
//! The host binary wires these to transports; everything here is
//! transport-agnostic and exercised directly by the test suite.

pub mod compiler;
pub mod db;
pub mod input;
pub mod model;
pub mod objdef;
pub mod tasks;
pub mod values;
pub mod vm;
