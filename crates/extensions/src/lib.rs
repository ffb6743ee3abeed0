//! Janus reference extensions.
//!
//! This crate contains bundled extension implementations for the Janus
//! bridge, one per hosted ecosystem: territory protection on the plugin
//! surface and block automation on the mod surface.

pub mod assembler;
pub mod territory;

// Re-export bridge types extensions commonly need.
pub use janus::{
    CapabilitySet, Ecosystem, Extension, ModListener, PluginListener, ProposalSink, SubjectPattern,
};

// Re-export extension implementations.
pub use assembler::{AssemblerExtension, Machine};
pub use territory::{Claim, TerritoryExtension};
