//! Services - navigation logic and state management
//!
//! - `signal_store` - Latest observation per location, with staleness
//! - `position` - Position estimates from visible beacons
//! - `planner` - Shortest-path routing over the adjacency graph
//! - `guidance` - Navigation session state machine
//! - `intent` - Free-text destination classifier
//! - `model_loader` - Classifier model fetch (file or HTTP)
//! - `navigator` - Single-owner task tying the pipeline together

pub mod guidance;
pub mod intent;
pub mod model_loader;
pub mod navigator;
pub mod planner;
pub mod position;
pub mod signal_store;

pub use navigator::{Destination, NavCommand, Navigator};
