//! Steward SDK
//!
//! Shared contracts for Steward components: the ability interface that
//! concrete actions implement, and the error types surfaced by the engine.

/// Error types and handling
pub mod errors;

/// Ability contract (spec, context, output, trait)
pub mod ability;

// Re-export commonly used types
pub use ability::{
    Ability, AbilityArgs, AbilityContext, AbilityError, AbilityOutput, AbilityParameter,
    AbilitySpec,
};
pub use errors::{EngineError, StewardErrorExt};
