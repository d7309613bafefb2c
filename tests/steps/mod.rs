//! Step definitions for the behavioural scenarios.

mod publish_steps;

pub use publish_steps::PublishWorld;
