pub mod cancel;
pub mod dates;
pub mod delay;
pub mod engine;
pub mod filter;
pub mod graph;
pub mod heuristic;
pub mod poller;
pub mod router;
pub mod runner;
pub mod send;
pub mod slots;
pub mod thread;

pub use cancel::{CancelOutcome, CancellationController, ExecutionRegistry};
pub use delay::{plan_timeline, DelaySpec};
pub use engine::CadenceEngine;
pub use graph::{resolve_graph, CadenceGraph, Edge, Resolution, ResolvedStep, StepNode};
pub use heuristic::HeuristicClassifier;
pub use poller::{PollReport, ReplyPoller};
pub use router::{InboundContext, RouteOutcome, SchedulingIntentRouter};
pub use runner::{CadenceRunner, RunOutcome, RunRequest};
pub use send::{Delivery, SendOutcome, SendPipeline};
pub use thread::ThreadContinuity;
