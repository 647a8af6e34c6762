use crate::{AppendError, ExecutionPlan};
use model::{ExecutionId, RecordRef};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::WaitForCancellationFuture;

/// PipelineSpec is the definition of a submitted computation.
/// Its definition is opaque to this crate and interpreted by an Engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub definition: String,
    /// Requirements which the engine must satisfy before running the pipeline.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<String>,
}

impl PipelineSpec {
    pub fn new(definition: impl Into<String>) -> Self {
        Self {
            definition: definition.into(),
            requirements: Vec::new(),
        }
    }
}

/// Engine is the operator runtime which executes pipelines.
pub trait Engine: Send + Sync + 'static {
    /// Begin executing the pipeline of `handle`. Implementations must not
    /// block: they retain the handle and report into it asynchronously,
    /// finishing with ExecutionHandle::on_complete().
    /// An Err means the pipeline could not be started at all.
    fn run(&self, handle: ExecutionHandle) -> anyhow::Result<()>;
}

/// ExecutionHandle is the Engine's back-reference to an ExecutionPlan.
/// It keeps the plan alive for as long as the Engine holds it.
#[derive(Clone)]
pub struct ExecutionHandle(Arc<ExecutionPlan>);

impl ExecutionHandle {
    pub(crate) fn new(plan: Arc<ExecutionPlan>) -> Self {
        Self(plan)
    }

    pub fn id(&self) -> &ExecutionId {
        self.0.id()
    }

    pub fn spec(&self) -> &crate::PipelineSpec {
        self.0.spec()
    }

    pub fn on_result(&self, record: RecordRef) -> Result<(), AppendError> {
        self.0.append_result(record)
    }

    pub fn on_error(&self, record: RecordRef) -> Result<(), AppendError> {
        self.0.append_error(record)
    }

    pub fn on_complete(&self) -> Result<(), AppendError> {
        self.0.complete()
    }

    pub fn is_aborted(&self) -> bool {
        self.0.abort_token().is_cancelled()
    }

    /// Resolves when the execution has been aborted and the
    /// Engine should stop producing records.
    pub fn aborted(&self) -> WaitForCancellationFuture<'_> {
        self.0.abort_token().cancelled()
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ExecutionHandle").field(self.0.id()).finish()
    }
}
