pub mod aerodynamics;
pub mod context;
pub mod events;
pub mod forces;
pub mod mass;
pub mod state;
pub mod stepper;
