//! Storage layer: schema inspection and the repair engine.

pub mod engine;
pub mod schema;
