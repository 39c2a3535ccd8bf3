//! API implementation submodules.
//!
//! Each submodule contains `impl TrainpipeApi` blocks. The struct definition
//! remains in `lib.rs`.

mod builder;
mod models;
mod registry;
mod training;

pub use builder::TrainpipeApiBuilder;
