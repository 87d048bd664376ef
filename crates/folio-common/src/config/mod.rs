//! Configuration for Folio.

mod engine;

pub use engine::EngineConfig;
