//! Cadence graphs: step nodes joined by directed connections.
//!
//! `resolve_graph` walks a graph from its start node and produces the
//! ordered list of email steps to schedule for one contact.

pub mod edge;
pub mod node;
pub mod resolver;
pub mod template;

pub use edge::Edge;
pub use node::{EmailConfig, StepNode};
pub use resolver::{resolve_graph, CadenceGraph, Resolution, ResolvedStep, SkippedStep};
