// engram-common: shared types and protocol plumbing for the Engram workspace

pub mod analysis;
pub mod protocol;
pub mod types;
