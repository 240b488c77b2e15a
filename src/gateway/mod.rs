//! # Gateway Module
//!
//! The request pipeline and its orchestration.

pub mod pipeline;

pub use pipeline::Gateway;
