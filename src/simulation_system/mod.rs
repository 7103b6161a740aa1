pub mod batch;
pub mod branch;
pub mod engine;
pub mod extensions;
pub mod phase;
pub mod simulation;
