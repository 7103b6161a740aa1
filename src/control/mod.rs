pub mod conditions;
pub mod environment;
pub mod launch_stages;
pub mod propulsion;
pub mod recovery;
pub mod structure;
pub mod wind;
