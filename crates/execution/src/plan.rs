use crate::{Client, ClientId, DeliveryError, PipelineSpec, ResultSet};
use model::{ExecutionId, RecordRef, Reply};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Status of an ExecutionPlan. Done and Aborted are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Created,
    Running,
    Done,
    Aborted,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::Running => "running",
            Status::Done => "done",
            Status::Aborted => "aborted",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AppendError is returned when the Engine reports into an
/// ExecutionPlan which is not (or is no longer) running.
#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    #[error("execution {id} is {status}: a {what} may only be reported while it's running")]
    NotRunning {
        id: ExecutionId,
        status: Status,
        what: &'static str,
    },
}

/// Info summarizes an ExecutionPlan for introspection.
#[derive(Debug, Clone, PartialEq)]
pub struct Info {
    pub id: ExecutionId,
    pub status: Status,
    pub definition: String,
    pub results: usize,
    pub errors: usize,
    pub waiters: usize,
    /// Running time of the execution, if it has started.
    pub duration: Option<Duration>,
}

impl Info {
    pub fn to_reply(&self) -> Reply {
        let duration = match self.duration {
            // Truncate to millisecond precision.
            Some(d) => Reply::from(
                humantime::format_duration(Duration::from_millis(d.as_millis() as u64)).to_string(),
            ),
            None => Reply::Null,
        };

        Reply::Array(vec![
            "id".into(),
            self.id.to_string().into(),
            "status".into(),
            Reply::simple(self.status.as_str()),
            "definition".into(),
            self.definition.as_str().into(),
            "results".into(),
            Reply::Integer(self.results as i64),
            "errors".into(),
            Reply::Integer(self.errors as i64),
            "waiters".into(),
            Reply::Integer(self.waiters as i64),
            "duration".into(),
            duration,
        ])
    }
}

/// ExecutionPlan is the stateful handle of one submitted computation.
/// It's shared by the Registry, the Engine (through ExecutionHandle),
/// and any clients blocked upon it.
pub struct ExecutionPlan {
    id: ExecutionId,
    spec: PipelineSpec,
    abort: CancellationToken,
    done_rx: watch::Receiver<Option<Status>>,
    state: Mutex<State>,
}

struct State {
    status: Status,
    results: Vec<RecordRef>,
    errors: Vec<RecordRef>,
    // Blocked waiters, keyed on a per-wait token.
    waiters: HashMap<u64, ClientId>,
    next_waiter: u64,
    // Taken upon the terminal transition, which is therefore notified exactly once.
    done_tx: Option<watch::Sender<Option<Status>>>,
    started: Option<Instant>,
    finished: Option<Instant>,
}

impl ExecutionPlan {
    pub(crate) fn new(id: ExecutionId, spec: PipelineSpec) -> Arc<Self> {
        let (done_tx, done_rx) = watch::channel(None);

        Arc::new(Self {
            id,
            spec,
            abort: CancellationToken::new(),
            done_rx,
            state: Mutex::new(State {
                status: Status::Created,
                results: Vec::new(),
                errors: Vec::new(),
                waiters: HashMap::new(),
                next_waiter: 0,
                done_tx: Some(done_tx),
                started: None,
                finished: None,
            }),
        })
    }

    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    pub fn status(&self) -> Status {
        self.state.lock().unwrap().status
    }

    /// Number of clients currently blocked on this execution.
    pub fn waiters(&self) -> usize {
        self.state.lock().unwrap().waiters.len()
    }

    /// Snapshot the current status and the results and errors reported so far.
    pub fn snapshot(&self) -> ResultSet {
        let state = self.state.lock().unwrap();

        ResultSet {
            id: self.id.clone(),
            status: state.status,
            results: state.results.clone(),
            errors: state.errors.clone(),
        }
    }

    pub fn info(&self) -> Info {
        let state = self.state.lock().unwrap();

        let duration = state.started.map(|started| match state.finished {
            Some(finished) => finished.saturating_duration_since(started),
            None => started.elapsed(),
        });

        Info {
            id: self.id.clone(),
            status: state.status,
            definition: self.spec.definition.clone(),
            results: state.results.len(),
            errors: state.errors.len(),
            waiters: state.waiters.len(),
            duration,
        }
    }

    /// Wait for this execution to reach a terminal status.
    /// The wait fails if `timeout` elapses first or if the `client` disconnects.
    /// In either case the client's registration as a waiter is removed,
    /// and the execution itself is unaffected.
    pub async fn wait(
        &self,
        client: &Client,
        timeout: Option<Duration>,
    ) -> Result<Status, DeliveryError> {
        let mut done_rx = self.done_rx.clone();

        let _guard = match self.add_waiter(client.id()) {
            Ok(guard) => guard,
            Err(status) => return Ok(status),
        };

        let done = async {
            match done_rx.wait_for(Option::is_some).await {
                Ok(status) => *status,
                Err(_) => None,
            }
        };
        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            status = done => Ok(status.unwrap_or_else(|| self.status())),
            () = client.disconnected() => {
                tracing::debug!(execution = %self.id, client = client.id(), "client disconnected while blocked");
                Err(DeliveryError::Cancelled { id: self.id.clone(), client: client.id() })
            }
            () = deadline => Err(DeliveryError::Timeout {
                id: self.id.clone(),
                timeout: timeout.unwrap_or_default(),
            }),
        }
    }

    /// Wait for this execution to reach a terminal status, without blocking
    /// a client upon it. Such a wait never prevents the execution's drop.
    pub async fn finished(&self) -> Status {
        let mut done_rx = self.done_rx.clone();

        let status = match done_rx.wait_for(Option::is_some).await {
            Ok(status) => status.unwrap_or(Status::Done),
            Err(_) => self.status(),
        };
        status
    }

    pub(crate) fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    /// Transition from Created to Running.
    pub(crate) fn start(&self) -> bool {
        let mut state = self.state.lock().unwrap();

        if state.status != Status::Created {
            return false;
        }
        state.status = Status::Running;
        state.started = Some(Instant::now());
        true
    }

    pub(crate) fn append_result(&self, record: RecordRef) -> Result<(), AppendError> {
        self.append(record, "result", |state| &mut state.results)
    }

    pub(crate) fn append_error(&self, record: RecordRef) -> Result<(), AppendError> {
        self.append(record, "error", |state| &mut state.errors)
    }

    fn append(
        &self,
        record: RecordRef,
        what: &'static str,
        sequence: fn(&mut State) -> &mut Vec<RecordRef>,
    ) -> Result<(), AppendError> {
        let mut state = self.state.lock().unwrap();

        if state.status != Status::Running {
            let status = state.status;
            std::mem::drop(state);
            return Err(self.not_running(status, what));
        }
        sequence(&mut state).push(record);
        Ok(())
    }

    /// Transition from Running to Done.
    /// Completing an already-aborted execution is a no-op.
    pub(crate) fn complete(&self) -> Result<(), AppendError> {
        let mut state = self.state.lock().unwrap();

        match state.status {
            Status::Running => {
                Self::terminate(&mut state, Status::Done);
                tracing::debug!(
                    execution = %self.id,
                    results = state.results.len(),
                    errors = state.errors.len(),
                    "execution completed"
                );
                Ok(())
            }
            Status::Aborted => Ok(()),
            status => {
                std::mem::drop(state);
                Err(self.not_running(status, "completion"))
            }
        }
    }

    /// Signal the Engine to stop and transition to Aborted, unless already terminal.
    /// Returns true if this call performed the transition.
    pub(crate) fn abort(&self) -> bool {
        self.abort.cancel();
        let mut state = self.state.lock().unwrap();

        if state.status.is_terminal() {
            return false;
        }
        Self::terminate(&mut state, Status::Aborted);
        tracing::debug!(execution = %self.id, "execution aborted");
        true
    }

    /// Whether the Registry may release this plan: it's terminal and has no waiters.
    pub(crate) fn is_idle(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.status.is_terminal() && state.waiters.is_empty()
    }

    fn terminate(state: &mut State, status: Status) {
        state.status = status;
        state.finished = Some(Instant::now());

        // The notification is sent under the same lock which guards waiter registration.
        if let Some(done_tx) = state.done_tx.take() {
            done_tx.send_replace(Some(status));
        }
    }

    fn not_running(&self, status: Status, what: &'static str) -> AppendError {
        let err = AppendError::NotRunning {
            id: self.id.clone(),
            status,
            what,
        };
        if status == Status::Aborted {
            // Engines routinely race with an abort.
            tracing::debug!(error = %err, "rejected report into aborted execution");
        } else {
            tracing::error!(error = %err, "engine violated the execution contract");
        }
        err
    }

    fn add_waiter(&self, client: ClientId) -> Result<WaiterGuard<'_>, Status> {
        let mut state = self.state.lock().unwrap();

        if state.status.is_terminal() {
            return Err(state.status);
        }
        let token = state.next_waiter;
        state.next_waiter += 1;
        state.waiters.insert(token, client);

        Ok(WaiterGuard { plan: self, token })
    }
}

impl fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

// Deregisters a waiter when dropped, including when its wait is cancelled.
struct WaiterGuard<'p> {
    plan: &'p ExecutionPlan,
    token: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.plan.state.lock() {
            state.waiters.remove(&self.token);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use model::{NodeId, Record};
    use pretty_assertions::assert_eq;

    fn plan() -> Arc<ExecutionPlan> {
        let id = ExecutionId::new(NodeId::new("node").unwrap(), 1);
        let plan = ExecutionPlan::new(id, PipelineSpec::new("emit 1"));
        assert!(plan.start());
        plan
    }

    #[test]
    fn test_appends_are_rejected_outside_running() {
        let id = ExecutionId::new(NodeId::new("node").unwrap(), 1);
        let created = ExecutionPlan::new(id, PipelineSpec::default());
        assert!(created.append_result(Record::string("early")).is_err());

        let plan = plan();
        plan.append_result(Record::string("a")).unwrap();
        plan.append_error(Record::error("oops")).unwrap();
        plan.complete().unwrap();

        let err = plan.append_result(Record::string("late")).unwrap_err();
        insta::assert_snapshot!(err, @"execution node-1 is done: a result may only be reported while it's running");
        assert!(plan.append_error(Record::error("late")).is_err());
        assert!(plan.complete().is_err());

        let snapshot = plan.snapshot();
        assert_eq!(snapshot.status, Status::Done);
        assert_eq!(snapshot.results, vec![Record::string("a")]);
        assert_eq!(snapshot.errors, vec![Record::error("oops")]);
    }

    #[test]
    fn test_abort_is_idempotent() {
        let plan = plan();
        assert!(plan.abort());
        assert!(!plan.abort());
        assert_eq!(plan.status(), Status::Aborted);
        assert!(plan.abort_token().is_cancelled());

        // Late reports from the engine are rejected, and completion is a no-op.
        assert!(plan.append_result(Record::string("late")).is_err());
        plan.complete().unwrap();
        assert_eq!(plan.status(), Status::Aborted);

        let done = self::plan();
        done.complete().unwrap();
        assert!(!done.abort());
        assert_eq!(done.status(), Status::Done);
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_contract_violations_are_logged() {
        let plan = plan();
        plan.complete().unwrap();
        assert!(plan.append_error(Record::error("late")).is_err());
        assert!(logs_contain("engine violated the execution contract"));
    }

    #[test]
    fn test_notifier_fires_once() {
        let plan = plan();
        let rx = plan.done_rx.clone();
        assert_eq!(*rx.borrow(), None);

        plan.complete().unwrap();
        assert!(!plan.abort());
        assert_eq!(*rx.borrow(), Some(Status::Done));
        assert!(plan.state.lock().unwrap().done_tx.is_none());
    }

    #[tokio::test]
    async fn test_wait_on_terminal_plan_returns_immediately() {
        let plan = plan();
        plan.complete().unwrap();

        let client = Client::new(7);
        assert_eq!(plan.wait(&client, None).await.unwrap(), Status::Done);
        assert_eq!(plan.waiters(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_removes_waiter() {
        let plan = plan();
        let client = Client::new(7);

        let err = plan
            .wait(&client, Some(Duration::from_millis(250)))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout { .. }));
        assert_eq!(plan.waiters(), 0);
        assert_eq!(plan.status(), Status::Running);
    }

    #[tokio::test]
    async fn test_finished_is_not_a_waiter() {
        let plan = plan();
        let finished = tokio::spawn({
            let plan = plan.clone();
            async move { plan.finished().await }
        });
        tokio::task::yield_now().await;
        assert_eq!(plan.waiters(), 0);

        assert!(plan.abort());
        assert_eq!(finished.await.unwrap(), Status::Aborted);
        assert_eq!(plan.finished().await, Status::Aborted);
    }

    #[tokio::test]
    async fn test_info() {
        let plan = plan();
        plan.append_result(Record::string("a")).unwrap();
        plan.complete().unwrap();

        let mut info = plan.info();
        assert!(info.duration.is_some());
        info.duration = Some(Duration::from_millis(1500));

        insta::assert_snapshot!(info.to_reply(), @r###"
         1) "id"
         2) "node-1"
         3) "status"
         4) done
         5) "definition"
         6) "emit 1"
         7) "results"
         8) (integer) 1
         9) "errors"
        10) (integer) 0
        11) "waiters"
        12) (integer) 0
        13) "duration"
        14) "1s 500ms"
        "###);
    }
}
