pub mod link;
pub mod log;
pub mod planner;
pub mod selection;
pub mod state;
pub mod telemetry;
