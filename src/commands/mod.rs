//! Command implementations for kmtk.

pub mod merge;

pub use merge::MergeCommand;
