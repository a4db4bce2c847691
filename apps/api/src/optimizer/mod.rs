// Profile optimization pipeline.
// Three LLM stages run strictly in order; all LLM calls go through llm_client.

pub mod analyzer;
pub mod collector;
pub mod generator;
pub mod handlers;
pub mod models;
pub mod stage;
pub mod summary;
pub mod workflow;

pub use workflow::{OptimizationRequest, Optimizer, OptimizerSettings};
