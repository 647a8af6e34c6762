use crate::{Ack, Error, Message, Registration, RegistrationPayload, RegistrationState};
use indexmap::IndexMap;
use model::{NodeId, RegistrationId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Transport delivers Messages between cluster members.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// All members of the cluster, including this node.
    fn members(&self) -> Vec<NodeId>;
    /// Deliver `message` to every other member, returning each member's delivery result.
    async fn broadcast(&self, message: Message) -> Vec<(NodeId, anyhow::Result<()>)>;
    /// Deliver `ack` to the origin `node` of its registration.
    async fn send_ack(&self, node: &NodeId, ack: Ack) -> anyhow::Result<()>;
}

/// Installer installs a registration's function on this node.
pub trait Installer: Send + Sync + 'static {
    fn install(&self, registration: &Registration) -> anyhow::Result<()>;
}

/// Reason for which a member failed a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The member acknowledged a failure to install, with its detail.
    Rejected(String),
    /// The member didn't acknowledge within the timeout.
    TimedOut,
    /// The registration couldn't be delivered to the member.
    Unreachable(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Rejected(detail) => f.write_str(detail),
            FailureReason::TimedOut => f.write_str("timed out waiting for acknowledgement"),
            FailureReason::Unreachable(detail) => write!(f, "unreachable: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub node: NodeId,
    pub reason: FailureReason,
}

/// Outcome of a registration attempt, delivered once to its completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationOutcome {
    pub id: RegistrationId,
    pub state: RegistrationState,
    /// Failed members, in cluster membership order. Empty if Committed.
    pub failures: Vec<NodeFailure>,
}

pub type OnDone = Box<dyn FnOnce(RegistrationOutcome) + Send>;

/// Controller coordinates the installation of registrations across the cluster,
/// and installs the registrations of other members upon their request.
#[derive(Clone)]
pub struct Controller(Arc<Inner>);

struct Inner {
    node: NodeId,
    transport: Arc<dyn Transport>,
    installer: Arc<dyn Installer>,
    ack_timeout: Duration,
    next_seq: AtomicU64,
    registrations: Mutex<IndexMap<RegistrationId, Arc<Registration>>>,
    // In-flight registrations originated by this node.
    sessions: Mutex<HashMap<RegistrationId, Arc<Session>>>,
}

// Session is the context of one in-flight registration attempt.
struct Session {
    registration: Arc<Registration>,
    expected: Vec<NodeId>,
    // Cancelled once the session completes.
    done: CancellationToken,
    state: Mutex<SessionState>,
}

struct SessionState {
    // First acknowledgement of each member, where Err is its failure.
    acks: HashMap<NodeId, Result<(), FailureReason>>,
    // Taken upon completion, which therefore happens exactly once.
    on_done: Option<OnDone>,
}

impl Session {
    // Record the first acknowledgement of `node`. If it was the last
    // outstanding member, returns the taken completion and its outcome.
    fn acknowledge(
        &self,
        node: NodeId,
        result: Result<(), FailureReason>,
    ) -> Option<(OnDone, RegistrationOutcome)> {
        let mut state = self.state.lock().unwrap();
        let id = self.registration.id();

        if !self.expected.contains(&node) {
            tracing::warn!(registration = %id, %node, "ignoring acknowledgement from a non-member");
            return None;
        } else if state.acks.contains_key(&node) {
            tracing::debug!(registration = %id, %node, "ignoring duplicate acknowledgement");
            return None;
        }
        state.acks.insert(node, result);

        if state.acks.len() == self.expected.len() {
            self.finish(&mut state)
        } else {
            None
        }
    }

    // Complete the session with whatever acknowledgements have arrived,
    // treating each missing member as timed out.
    fn expire(&self) -> Option<(OnDone, RegistrationOutcome)> {
        let mut state = self.state.lock().unwrap();
        self.finish(&mut state)
    }

    fn finish(&self, state: &mut SessionState) -> Option<(OnDone, RegistrationOutcome)> {
        let on_done = state.on_done.take()?;

        let failures: Vec<NodeFailure> = self
            .expected
            .iter()
            .filter_map(|node| {
                let reason = match state.acks.get(node) {
                    Some(Ok(())) => return None,
                    Some(Err(reason)) => reason.clone(),
                    None => FailureReason::TimedOut,
                };
                Some(NodeFailure {
                    node: node.clone(),
                    reason,
                })
            })
            .collect();

        let outcome = RegistrationOutcome {
            id: self.registration.id().clone(),
            state: if failures.is_empty() {
                RegistrationState::Committed
            } else {
                RegistrationState::Failed
            },
            failures,
        };
        self.registration.set_state(outcome.state);
        self.done.cancel();

        Some((on_done, outcome))
    }
}

impl Controller {
    pub fn new(
        node: NodeId,
        transport: Arc<dyn Transport>,
        installer: Arc<dyn Installer>,
        ack_timeout: Duration,
    ) -> Self {
        Self(Arc::new(Inner {
            node,
            transport,
            installer,
            ack_timeout,
            next_seq: AtomicU64::new(1),
            registrations: Mutex::new(IndexMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }))
    }

    pub fn node(&self) -> &NodeId {
        &self.0.node
    }

    /// Begin a cluster-wide registration of `payload`, returning its id without
    /// waiting for it. `on_done` is called exactly once, when every member has
    /// acknowledged the registration or the acknowledgement timeout elapses.
    ///
    /// Members which install the registration retain it even if others fail.
    /// Must be called within a tokio runtime.
    #[tracing::instrument(level = "debug", skip_all, fields(node = %self.0.node))]
    pub fn register(
        &self,
        payload: RegistrationPayload,
        on_done: impl FnOnce(RegistrationOutcome) + Send + 'static,
    ) -> Result<RegistrationId, Error> {
        payload.validate()?;

        let seq = self.0.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = RegistrationId::new(self.0.node.clone(), seq);
        let registration = Arc::new(Registration::new(id.clone(), payload, RegistrationState::Pending));

        self.0
            .registrations
            .lock()
            .unwrap()
            .insert(id.clone(), registration.clone());

        // A function which can't be installed locally isn't offered to the cluster.
        if let Err(err) = self.0.installer.install(&registration) {
            tracing::warn!(registration = %id, error = ?err, "failed to install registration locally");
            registration.set_state(RegistrationState::Failed);

            on_done(RegistrationOutcome {
                id: id.clone(),
                state: RegistrationState::Failed,
                failures: vec![NodeFailure {
                    node: self.0.node.clone(),
                    reason: FailureReason::Rejected(format!("{err:#}")),
                }],
            });
            return Ok(id);
        }

        let mut expected = self.0.transport.members();
        if !expected.contains(&self.0.node) {
            expected.insert(0, self.0.node.clone());
        }
        let session = Arc::new(Session {
            registration,
            expected,
            done: CancellationToken::new(),
            state: Mutex::new(SessionState {
                acks: HashMap::new(),
                on_done: Some(Box::new(on_done)),
            }),
        });
        self.0
            .sessions
            .lock()
            .unwrap()
            .insert(id.clone(), session.clone());

        tracing::info!(registration = %id, members = session.expected.len(), "registering function");

        self.acknowledge(Ack {
            registration: id.clone(),
            node: self.0.node.clone(),
            error: None,
        });

        if !session.done.is_cancelled() {
            tokio::spawn(self.clone().broadcast(session));
        }
        Ok(id)
    }

    // Offer the session's registration to other members, then await their
    // acknowledgements until the session completes or times out.
    async fn broadcast(self, session: Arc<Session>) {
        let deadline = tokio::time::Instant::now() + self.0.ack_timeout;
        let id = session.registration.id().clone();

        let message = Message::Register {
            id: id.clone(),
            payload: session.registration.payload().clone(),
        };
        // Delivery is bounded by the same deadline as acknowledgements.
        let delivered =
            match tokio::time::timeout_at(deadline, self.0.transport.broadcast(message)).await {
                Ok(delivered) => delivered,
                Err(_elapsed) => {
                    tracing::warn!(registration = %id, "broadcast did not finish before the deadline");
                    Vec::new()
                }
            };

        for (node, result) in delivered {
            if let Err(err) = result {
                tracing::warn!(registration = %id, %node, error = ?err, "failed to deliver registration");

                let result = Err(FailureReason::Unreachable(format!("{err:#}")));
                if let Some(done) = session.acknowledge(node, result) {
                    self.complete(done);
                }
            }
        }

        tokio::select! {
            () = session.done.cancelled() => (),
            () = tokio::time::sleep_until(deadline) => {
                if let Some(done) = session.expire() {
                    tracing::warn!(registration = %id, timeout = ?self.0.ack_timeout, "registration timed out");
                    self.complete(done);
                }
            }
        }
    }

    /// Handle a Message received from another member.
    #[tracing::instrument(level = "debug", skip_all, fields(node = %self.0.node))]
    pub async fn on_message(&self, message: Message) {
        match message {
            Message::Register { id, payload } => self.on_register(id, payload).await,
            Message::Ack(ack) => self.acknowledge(ack),
        }
    }

    async fn on_register(&self, id: RegistrationId, payload: RegistrationPayload) {
        let existing = self.0.registrations.lock().unwrap().get(&id).cloned();

        let error = match existing {
            // A redelivered registration was already installed.
            Some(_) => None,
            None => {
                let registration = Arc::new(Registration::new(
                    id.clone(),
                    payload,
                    RegistrationState::Committed,
                ));
                match self.0.installer.install(&registration) {
                    Ok(()) => {
                        tracing::info!(registration = %id, "installed registration of a peer");
                        self.0
                            .registrations
                            .lock()
                            .unwrap()
                            .insert(id.clone(), registration);
                        None
                    }
                    Err(err) => {
                        tracing::warn!(registration = %id, error = ?err, "failed to install registration of a peer");
                        Some(format!("{err:#}"))
                    }
                }
            }
        };

        let origin = id.node().clone();
        let ack = Ack {
            registration: id,
            node: self.0.node.clone(),
            error,
        };
        if let Err(err) = self.0.transport.send_ack(&origin, ack).await {
            tracing::warn!(%origin, error = ?err, "failed to send registration acknowledgement");
        }
    }

    fn acknowledge(&self, ack: Ack) {
        let Ack {
            registration,
            node,
            error,
        } = ack;

        let session = self.0.sessions.lock().unwrap().get(&registration).cloned();
        let Some(session) = session else {
            tracing::debug!(%registration, %node, "ignoring acknowledgement of a completed registration");
            return;
        };

        let result = match error {
            None => Ok(()),
            Some(detail) => Err(FailureReason::Rejected(detail)),
        };
        if let Some(done) = session.acknowledge(node, result) {
            self.complete(done);
        }
    }

    fn complete(&self, (on_done, outcome): (OnDone, RegistrationOutcome)) {
        self.0.sessions.lock().unwrap().remove(&outcome.id);

        if outcome.failures.is_empty() {
            tracing::info!(registration = %outcome.id, "registration committed");
        } else {
            tracing::warn!(
                registration = %outcome.id,
                failures = ?outcome.failures,
                "registration failed on some members, which are not rolled back"
            );
        }
        on_done(outcome);
    }

    /// Reset the stats of the identified registration, or of all registrations.
    /// Returns the number of registrations which were reset.
    pub fn flush_stats(&self, id: Option<&RegistrationId>) -> Result<usize, Error> {
        match id {
            Some(id) => {
                self.get(id)?.stats().reset();
                Ok(1)
            }
            None => {
                let registrations = self.list();
                for registration in &registrations {
                    registration.stats().reset();
                }
                Ok(registrations.len())
            }
        }
    }

    pub fn get(&self, id: &RegistrationId) -> Result<Arc<Registration>, Error> {
        self.0
            .registrations
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    /// All registrations known to this node, in the order they became known.
    pub fn list(&self) -> Vec<Arc<Registration>> {
        self.0
            .registrations
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect()
    }

    /// Number of registration attempts of this node which are still in flight.
    pub fn pending(&self) -> usize {
        self.0.sessions.lock().unwrap().len()
    }
}
