//! CLI command implementations.

pub mod keygen;
pub mod status;
pub mod validate;
