// Shared utilities for the procurement workflow engine

pub mod serde_helpers;
