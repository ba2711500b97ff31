pub mod clock;
pub mod models;
pub mod planner;
pub mod progress;
pub mod session;
