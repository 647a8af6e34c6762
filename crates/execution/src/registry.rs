use crate::{Engine, Error, ExecutionHandle, ExecutionPlan, PipelineSpec, Status};
use indexmap::IndexMap;
use model::{ExecutionId, NodeId, Record};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Registry is the table of this node's Execution Plans, keyed on ExecutionId
/// and ordered by creation.
///
/// Lock order is always the registry lock, then a single plan's lock.
/// Plans never take the registry lock.
pub struct Registry {
    node: NodeId,
    engine: Arc<dyn Engine>,
    max_executions: usize,
    next_seq: AtomicU64,
    plans: Mutex<IndexMap<ExecutionId, Arc<ExecutionPlan>>>,
}

impl Registry {
    /// Build a Registry for `node` which runs pipelines on `engine`.
    /// Once more than `max_executions` plans are held, the oldest
    /// idle ones are evicted.
    pub fn new(node: NodeId, engine: Arc<dyn Engine>, max_executions: usize) -> Self {
        Self {
            node,
            engine,
            max_executions,
            next_seq: AtomicU64::new(1),
            plans: Mutex::new(IndexMap::new()),
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Create and start a new execution of `spec`, returning without waiting for it.
    #[tracing::instrument(level = "debug", skip_all, fields(node = %self.node))]
    pub fn create(&self, spec: PipelineSpec) -> Arc<ExecutionPlan> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let plan = ExecutionPlan::new(ExecutionId::new(self.node.clone(), seq), spec);

        {
            let mut plans = self.plans.lock().unwrap();
            plans.insert(plan.id().clone(), plan.clone());
            self.evict(&mut plans);
        }

        self.launch(&plan);
        plan
    }

    // Start `plan` on the engine, unless it was aborted before it could start.
    fn launch(&self, plan: &Arc<ExecutionPlan>) {
        if !plan.start() {
            tracing::debug!(execution = %plan.id(), status = %plan.status(), "execution ended before it started");
            return;
        }
        tracing::debug!(execution = %plan.id(), "starting execution");

        if let Err(err) = self.engine.run(ExecutionHandle::new(plan.clone())) {
            tracing::warn!(execution = %plan.id(), error = ?err, "engine failed to start execution");

            let handle = ExecutionHandle::new(plan.clone());
            if let Err(err) = handle
                .on_error(Record::error(format!("{err:#}")))
                .and_then(|()| handle.on_complete())
            {
                tracing::warn!(error = %err, "failed to complete an execution which didn't start");
            }
        }
    }

    pub fn lookup(&self, id: &ExecutionId) -> Result<Arc<ExecutionPlan>, Error> {
        self.plans
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    /// Abort the execution, returning its resulting status.
    /// Aborting an already-terminated execution has no effect.
    pub fn abort(&self, id: &ExecutionId) -> Result<Status, Error> {
        let plan = self.lookup(id)?;

        if plan.abort() {
            tracing::info!(execution = %id, "aborted execution");
        }
        Ok(plan.status())
    }

    /// Remove the execution from the registry. Unless `force`, the execution
    /// must be terminal and have no blocked clients. With `force` it's aborted first.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn drop_execution(&self, id: &ExecutionId, force: bool) -> Result<Arc<ExecutionPlan>, Error> {
        let mut plans = self.plans.lock().unwrap();
        let plan = plans.get(id).ok_or_else(|| Error::NotFound(id.clone()))?;

        if force {
            plan.abort();
        } else {
            let info = plan.info();

            if !info.status.is_terminal() {
                return Err(Error::NotTerminal {
                    id: id.clone(),
                    status: info.status,
                });
            } else if info.waiters != 0 {
                return Err(Error::Waited {
                    id: id.clone(),
                    waiters: info.waiters,
                });
            }
        }

        let plan = plans
            .shift_remove(id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        tracing::debug!(execution = %id, force, "dropped execution");

        Ok(plan)
    }

    /// All held executions, oldest first.
    pub fn list(&self) -> Vec<Arc<ExecutionPlan>> {
        self.plans.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.plans.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort and remove every execution, returning the number removed.
    pub fn shutdown(&self) -> usize {
        let plans = std::mem::take(&mut *self.plans.lock().unwrap());

        for plan in plans.values() {
            plan.abort();
        }
        tracing::info!(node = %self.node, executions = plans.len(), "execution registry shut down");

        plans.len()
    }

    // Evict the oldest idle plans while over capacity.
    // Running plans and plans with blocked clients are never evicted.
    fn evict(&self, plans: &mut IndexMap<ExecutionId, Arc<ExecutionPlan>>) {
        while plans.len() > self.max_executions {
            let Some(index) = plans.values().position(|plan| plan.is_idle()) else {
                break;
            };
            if let Some((id, _plan)) = plans.shift_remove_index(index) {
                tracing::debug!(execution = %id, "evicted execution");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{AppendError, Client};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    // Engine which retains handles for the test to drive.
    #[derive(Default)]
    struct Manual(Mutex<Vec<ExecutionHandle>>);

    impl Engine for Manual {
        fn run(&self, handle: ExecutionHandle) -> anyhow::Result<()> {
            if handle.spec().definition == "refuse" {
                anyhow::bail!("syntax error near 'refuse'");
            }
            self.0.lock().unwrap().push(handle);
            Ok(())
        }
    }

    impl Manual {
        fn handle(&self, index: usize) -> ExecutionHandle {
            self.0.lock().unwrap()[index].clone()
        }
    }

    fn registry(max_executions: usize) -> (Arc<Manual>, Registry) {
        let engine = Arc::new(Manual::default());
        let registry = Registry::new(NodeId::new("n1").unwrap(), engine.clone(), max_executions);
        (engine, registry)
    }

    #[test]
    fn test_create_and_lookup() {
        let (engine, registry) = registry(10);

        let one = registry.create(PipelineSpec::new("a"));
        let two = registry.create(PipelineSpec::new("b"));

        assert_eq!(one.id().to_string(), "n1-1");
        assert_eq!(two.id().to_string(), "n1-2");
        assert_eq!(one.status(), Status::Running);
        assert_eq!(engine.handle(1).id(), two.id());

        assert!(Arc::ptr_eq(&registry.lookup(one.id()).unwrap(), &one));
        let missing: ExecutionId = "n1-99".parse().unwrap();
        assert!(matches!(registry.lookup(&missing), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_engine_refusal_is_an_execution_error() {
        let (_engine, registry) = registry(10);
        let plan = registry.create(PipelineSpec::new("refuse"));

        let set = plan.snapshot();
        assert_eq!(set.status, Status::Done);
        assert!(set.results.is_empty());
        assert_eq!(set.errors, vec![Record::error("syntax error near 'refuse'")]);
    }

    #[test]
    fn test_execution_aborted_before_start_never_runs() {
        let (engine, registry) = registry(10);
        let id = ExecutionId::new(registry.node().clone(), 7);
        let plan = ExecutionPlan::new(id, PipelineSpec::new("a"));

        assert!(plan.abort());
        registry.launch(&plan);

        assert!(engine.0.lock().unwrap().is_empty());
        assert_eq!(plan.status(), Status::Aborted);
    }

    #[test]
    fn test_abort() {
        let (engine, registry) = registry(10);
        let plan = registry.create(PipelineSpec::new("a"));
        let handle = engine.handle(0);

        assert_eq!(registry.abort(plan.id()).unwrap(), Status::Aborted);
        assert!(handle.is_aborted());
        assert!(matches!(
            handle.on_result(Record::string("late")),
            Err(AppendError::NotRunning { status: Status::Aborted, .. })
        ));

        // Idempotent.
        assert_eq!(registry.abort(plan.id()).unwrap(), Status::Aborted);

        // Aborting a Done execution is a no-op.
        let done = registry.create(PipelineSpec::new("b"));
        engine.handle(1).on_complete().unwrap();
        assert_eq!(registry.abort(done.id()).unwrap(), Status::Done);
    }

    #[test]
    fn test_drop_rules() {
        let (engine, registry) = registry(10);
        let plan = registry.create(PipelineSpec::new("a"));

        let err = registry.drop_execution(plan.id(), false).unwrap_err();
        insta::assert_snapshot!(err, @"execution n1-1 is running and cannot be dropped until it completes (use FORCE to abort it)");

        engine.handle(0).on_complete().unwrap();
        registry.drop_execution(plan.id(), false).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.drop_execution(plan.id(), false),
            Err(Error::NotFound(_))
        ));

        // Forced drops abort a running execution.
        let running = registry.create(PipelineSpec::new("b"));
        let dropped = registry.drop_execution(running.id(), true).unwrap();
        assert_eq!(dropped.status(), Status::Aborted);
        assert!(engine.handle(1).is_aborted());
    }

    #[tokio::test]
    async fn test_drop_of_waited_execution_is_in_use() {
        let (engine, registry) = registry(10);
        let plan = registry.create(PipelineSpec::new("a"));
        let client = Client::new(1);

        let waiter = {
            let plan = plan.clone();
            let client = client.clone();
            tokio::spawn(async move { plan.wait(&client, None).await })
        };
        while plan.waiters() == 0 {
            tokio::task::yield_now().await;
        }

        // The waiter task hasn't yet been polled to observe completion.
        engine.handle(0).on_complete().unwrap();
        assert!(matches!(
            registry.drop_execution(plan.id(), false),
            Err(Error::Waited { waiters: 1, .. })
        ));

        assert_eq!(waiter.await.unwrap().unwrap(), Status::Done);
        assert_eq!(plan.waiters(), 0);
        registry.drop_execution(plan.id(), false).unwrap();
    }

    #[test]
    fn test_retention_evicts_oldest_idle() {
        let (engine, registry) = registry(2);

        let one = registry.create(PipelineSpec::new("1"));
        let two = registry.create(PipelineSpec::new("2"));
        engine.handle(1).on_complete().unwrap();

        // `one` is still running, so `two` is evicted instead.
        let three = registry.create(PipelineSpec::new("3"));
        let ids: Vec<_> = registry.list().iter().map(|p| p.id().clone()).collect();
        assert_eq!(ids, vec![one.id().clone(), three.id().clone()]);
        assert!(registry.lookup(two.id()).is_err());

        // With nothing idle, the registry grows past its bound.
        let _four = registry.create(PipelineSpec::new("4"));
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_and_wakes_waiters() {
        let (_engine, registry) = registry(10);
        let plan = registry.create(PipelineSpec::new("a"));
        let client = Client::new(1);

        let waiter = {
            let plan = plan.clone();
            tokio::spawn(async move { plan.wait(&client, Some(Duration::from_secs(60))).await })
        };
        while plan.waiters() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(registry.shutdown(), 1);
        assert!(registry.is_empty());
        assert_eq!(waiter.await.unwrap().unwrap(), Status::Aborted);
    }
}
