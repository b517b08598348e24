//! Turn-taking pipeline: event types, response classification, the gate
//! policy, the turn controller and its event loop.

pub mod classifier;
pub mod controller;
pub mod coordinator;
pub mod gate;
pub mod messages;
