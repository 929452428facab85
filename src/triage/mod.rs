// SPDX-License-Identifier: MIT

//! Email triage built on the flow engine: classify, route to a handler,
//! escalate to a human when needed, draft, send.

pub mod config;
pub mod email;
pub mod ollama;
pub mod server;
pub mod services;
pub mod steps;

pub use config::RuntimeConfig;
pub use email::{Approval, Classification, HumanDecision, Topic, Urgency};
pub use services::Services;
pub use steps::build_graph;
