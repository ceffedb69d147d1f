pub mod dag;
pub mod events;
pub mod lifecycle;
pub mod messaging;
pub mod trigger;
pub mod workflow;

pub use dag::{Dag, DagNode};
pub use events::*;
pub use lifecycle::*;
pub use messaging::*;
pub use trigger::{next_trigger, validate_option, TriggerCalculator, NEVER_TRIGGER_AT};
pub use workflow::{validate_workflow, WorkflowGraph, DEFAULT_MAX_NODES};
