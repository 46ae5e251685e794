//! Poll results and the executions emitted from them.

use crate::models::object::ObjectRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type name recorded on every execution started by this trigger.
pub const TRIGGER_TYPE: &str = "gcs.Trigger";

/// Output of one successful poll cycle. Every blob carries a staged `uri`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PollResult {
    pub blobs: Vec<ObjectRef>,
}

/// Identity of the flow and trigger a cycle runs for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerContext {
    pub namespace: String,
    pub flow_id: String,
    pub flow_revision: i64,
    pub trigger_id: String,
}

/// Per-cycle context. The execution id is allocated before anything is
/// staged so that downloaded files live under the execution they belong to.
#[derive(Clone, Debug)]
pub struct CycleContext<'a> {
    pub trigger: &'a TriggerContext,
    pub execution_id: Uuid,
}

impl<'a> CycleContext<'a> {
    pub fn new(trigger: &'a TriggerContext) -> Self {
        Self {
            trigger,
            execution_id: Uuid::new_v4(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Created,
}

impl ExecutionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Created => "CREATED",
        }
    }
}

/// Trigger section of an execution: who started it and with what output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ExecutionTrigger {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub variables: PollResult,
}

/// A new workflow run requested by the trigger.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: Uuid,
    pub namespace: String,
    pub flow_id: String,
    pub flow_revision: i64,
    pub state: ExecutionState,
    pub trigger: ExecutionTrigger,
    pub created_at: DateTime<Utc>,
}

impl Execution {
    pub fn from_poll(cycle: &CycleContext<'_>, result: PollResult) -> Self {
        Self {
            id: cycle.execution_id,
            namespace: cycle.trigger.namespace.clone(),
            flow_id: cycle.trigger.flow_id.clone(),
            flow_revision: cycle.trigger.flow_revision,
            state: ExecutionState::Created,
            trigger: ExecutionTrigger {
                id: cycle.trigger.trigger_id.clone(),
                kind: TRIGGER_TYPE.to_string(),
                variables: result,
            },
            created_at: Utc::now(),
        }
    }
}
