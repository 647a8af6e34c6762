use crate::args::{keyword, unexpected, Args};
use crate::{Command, CommandError, Config, ResponseSink, Status};
use execution::{delivery, Client, ExecutionPlan, PipelineSpec, Registry, ResultSet};
use model::{ExecutionId, Record, RegistrationId, Reply};
use registration::{
    Controller, Invocation, Mode, RegistrationOutcome, RegistrationPayload, RegistrationState,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reader of registrations which are triggered by RG.TRIGGER.
pub const COMMAND_READER: &str = "CommandReader";

/// Commands is the command-facing surface of a node's execution Registry
/// and registration Controller.
pub struct Commands {
    registry: Arc<Registry>,
    controller: Controller,
    config: Config,
}

impl Commands {
    pub fn new(registry: Arc<Registry>, controller: Controller, config: Config) -> Self {
        Self {
            registry,
            controller,
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Dispatch the command `name` with `args` on behalf of `client`.
    /// Its Reply, or its error, is sent to `sink`. A client which disconnects
    /// while blocked is sent nothing. A command whose Reply follows later,
    /// such as RG.REGISTER, returns Pending.
    #[tracing::instrument(level = "debug", skip(self, args, client, sink), fields(client = client.id()))]
    pub async fn dispatch(
        &self,
        name: &str,
        args: &[String],
        client: &Client,
        sink: Arc<dyn ResponseSink>,
    ) -> Status {
        let result = match name.parse::<Command>() {
            Ok(Command::AbortExecution) => self.abort_execution(args),
            Ok(Command::DropExecution) => self.drop_execution(args),
            Ok(Command::GetResults) => self.get_results(args),
            Ok(Command::GetResultsBlocking) => self.get_results_blocking(args, client).await,
            Ok(Command::Register) => self.register(args, sink.clone()).map(|_id| None),
            Ok(Command::FlushRegistrationsStats) => self.flush_registrations_stats(args),
            Ok(Command::Execute) => self.execute(args, client).await,
            Ok(Command::GetExecution) => self.get_execution(args),
            Ok(Command::DumpExecutions) => self.dump_executions(args),
            Ok(Command::DumpRegistrations) => self.dump_registrations(args),
            Ok(Command::Trigger) => self.trigger(args, client).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(Some(reply)) => {
                sink.send(reply);
                Status::Ok
            }
            // The Reply is sent later.
            Ok(None) => Status::Pending,
            Err(err) => {
                let status = err.status();

                match status {
                    Status::Cancelled => tracing::debug!(error = %err, "client went away"),
                    Status::InternalError => tracing::error!(error = ?err, "command failed"),
                    _ => tracing::debug!(error = %err, %status, "command failed"),
                }
                if status != Status::Cancelled {
                    sink.send(Reply::error(err.to_string()));
                }
                status
            }
        }
    }

    /// RG.ABORTEXECUTION <id>
    pub fn abort_execution(&self, args: &[String]) -> Result<Option<Reply>, CommandError> {
        let mut args = Args::new(Command::AbortExecution, args);
        let id: ExecutionId = args.parse()?;
        args.finish()?;

        self.registry.abort(&id)?;
        Ok(Some(Reply::Ok))
    }

    /// RG.DROPEXECUTION <id> [FORCE]
    pub fn drop_execution(&self, args: &[String]) -> Result<Option<Reply>, CommandError> {
        let mut args = Args::new(Command::DropExecution, args);
        let id: ExecutionId = args.parse()?;
        let force = match args.next() {
            None => false,
            Some(arg) if keyword(arg, "FORCE") => true,
            Some(arg) => return Err(unexpected(arg)),
        };
        args.finish()?;

        self.registry.drop_execution(&id, force)?;
        Ok(Some(Reply::Ok))
    }

    /// RG.GETRESULTS <id>
    pub fn get_results(&self, args: &[String]) -> Result<Option<Reply>, CommandError> {
        let plan = self.lookup(Command::GetResults, args)?;
        Ok(Some(delivery::immediate(&plan).to_reply()))
    }

    /// RG.GETRESULTSBLOCKING <id> [TIMEOUT <ms>]
    pub async fn get_results_blocking(
        &self,
        args: &[String],
        client: &Client,
    ) -> Result<Option<Reply>, CommandError> {
        let mut args = Args::new(Command::GetResultsBlocking, args);
        let id: ExecutionId = args.parse()?;

        let mut timeout = self.config.blocking_timeout;
        match args.next() {
            None => (),
            Some(arg) if keyword(arg, "TIMEOUT") => {
                let ms = args.value_of("TIMEOUT")?;
                let ms: u64 = ms.parse().map_err(|_| {
                    CommandError::InvalidArgument(format!("invalid TIMEOUT {ms:?}: expected milliseconds"))
                })?;
                timeout = Some(Duration::from_millis(ms));
            }
            Some(arg) => return Err(unexpected(arg)),
        }
        args.finish()?;

        let plan = self.registry.lookup(&id)?;
        let set = completed(delivery::blocking(&plan, client, timeout).await?)?;
        Ok(Some(set.to_reply()))
    }

    /// RG.REGISTER <function> [READER r] [PREFIX p] [MODE m] [DESCRIPTION d]
    ///
    /// Returns once the registration has begun. Its outcome is later sent to
    /// `sink` as OK, or as the array of member failures.
    pub fn register(
        &self,
        args: &[String],
        sink: Arc<dyn ResponseSink>,
    ) -> Result<RegistrationId, CommandError> {
        let mut args = Args::new(Command::Register, args);
        let mut payload = RegistrationPayload::new(args.required()?);

        while let Some(arg) = args.next() {
            if keyword(arg, "READER") {
                payload.reader = args.value_of("READER")?.to_string();
            } else if keyword(arg, "PREFIX") {
                payload.prefix = args.value_of("PREFIX")?.to_string();
            } else if keyword(arg, "MODE") {
                payload.mode = args.value_of("MODE")?.parse::<Mode>()?;
            } else if keyword(arg, "DESCRIPTION") {
                payload.description = Some(args.value_of("DESCRIPTION")?.to_string());
            } else {
                return Err(unexpected(arg));
            }
        }

        let id = self.controller.register(payload, move |outcome| {
            sink.send(registration_reply(&outcome));
        })?;
        Ok(id)
    }

    /// RG.FLUSHREGISTRATIONSSTATS [<registration-id>]
    pub fn flush_registrations_stats(&self, args: &[String]) -> Result<Option<Reply>, CommandError> {
        let mut args = Args::new(Command::FlushRegistrationsStats, args);
        let id = args
            .next()
            .map(str::parse::<RegistrationId>)
            .transpose()?;
        args.finish()?;

        let flushed = self.controller.flush_stats(id.as_ref())?;
        tracing::debug!(flushed, "flushed registration stats");
        Ok(Some(Reply::Ok))
    }

    /// RG.EXECUTE <pipeline> [UNBLOCKING] [REQUIREMENTS <requirement>...]
    ///
    /// Without UNBLOCKING, waits for the execution and replies with its results,
    /// after which the execution is dropped. With UNBLOCKING, replies with its id.
    pub async fn execute(
        &self,
        args: &[String],
        client: &Client,
    ) -> Result<Option<Reply>, CommandError> {
        let mut args = Args::new(Command::Execute, args);
        let mut spec = PipelineSpec::new(args.required()?);
        let mut unblocking = false;

        while let Some(arg) = args.next() {
            if keyword(arg, "UNBLOCKING") {
                unblocking = true;
            } else if keyword(arg, "REQUIREMENTS") {
                spec.requirements = args.remaining();
                if spec.requirements.is_empty() {
                    return Err(CommandError::InvalidArgument(
                        "REQUIREMENTS requires at least one requirement".to_string(),
                    ));
                }
            } else {
                return Err(unexpected(arg));
            }
        }

        if unblocking {
            let plan = self.registry.create(spec);
            return Ok(Some(plan.id().to_string().into()));
        }
        let set = self.run_to_completion(spec, client).await?;
        Ok(Some(set.to_reply()))
    }

    /// RG.GETEXECUTION <id>
    pub fn get_execution(&self, args: &[String]) -> Result<Option<Reply>, CommandError> {
        let plan = self.lookup(Command::GetExecution, args)?;
        Ok(Some(plan.info().to_reply()))
    }

    /// RG.DUMPEXECUTIONS
    pub fn dump_executions(&self, args: &[String]) -> Result<Option<Reply>, CommandError> {
        Args::new(Command::DumpExecutions, args).finish()?;

        let executions = self
            .registry
            .list()
            .iter()
            .map(|plan| {
                Reply::Array(vec![
                    "executionId".into(),
                    plan.id().to_string().into(),
                    "status".into(),
                    Reply::simple(plan.status().as_str()),
                ])
            })
            .collect();
        Ok(Some(Reply::Array(executions)))
    }

    /// RG.DUMPREGISTRATIONS
    pub fn dump_registrations(&self, args: &[String]) -> Result<Option<Reply>, CommandError> {
        Args::new(Command::DumpRegistrations, args).finish()?;

        let registrations = self
            .controller
            .list()
            .iter()
            .map(|registration| registration.to_reply())
            .collect();
        Ok(Some(Reply::Array(registrations)))
    }

    /// RG.TRIGGER <trigger>
    ///
    /// Runs the committed registration of this node which has reader
    /// CommandReader and prefix `trigger`, and updates its stats.
    pub async fn trigger(
        &self,
        args: &[String],
        client: &Client,
    ) -> Result<Option<Reply>, CommandError> {
        let mut args = Args::new(Command::Trigger, args);
        let trigger = args.required()?;
        args.finish()?;

        let registration = self
            .controller
            .list()
            .into_iter()
            .find(|registration| {
                let payload = registration.payload();
                payload.reader == COMMAND_READER
                    && payload.prefix == trigger
                    && registration.state() == RegistrationState::Committed
            })
            .ok_or_else(|| CommandError::UnknownTrigger(trigger.to_string()))?;

        let started = Instant::now();
        let plan = self
            .registry
            .create(PipelineSpec::new(registration.payload().function.as_str()));

        match self.wait_and_drop(&plan, client).await {
            Ok(set) => {
                registration.stats().record(started.elapsed(), invocation(&set));
                Ok(Some(set.to_reply()))
            }
            Err(err) => {
                // The execution outlives its client. Its outcome is recorded once it finishes.
                tokio::spawn(async move {
                    plan.finished().await;
                    registration
                        .stats()
                        .record(started.elapsed(), invocation(&plan.snapshot()));
                });
                Err(err)
            }
        }
    }

    fn lookup(&self, command: Command, args: &[String]) -> Result<Arc<ExecutionPlan>, CommandError> {
        let mut args = Args::new(command, args);
        let id: ExecutionId = args.parse()?;
        args.finish()?;

        Ok(self.registry.lookup(&id)?)
    }

    // Create an execution of `spec`, wait for it, and then drop it.
    async fn run_to_completion(
        &self,
        spec: PipelineSpec,
        client: &Client,
    ) -> Result<ResultSet, CommandError> {
        let plan = self.registry.create(spec);
        self.wait_and_drop(&plan, client).await
    }

    // If the wait fails the execution is left for the retention policy.
    async fn wait_and_drop(
        &self,
        plan: &ExecutionPlan,
        client: &Client,
    ) -> Result<ResultSet, CommandError> {
        let set = delivery::blocking(plan, client, self.config.blocking_timeout).await?;
        let set = completed(set)?;

        if let Err(err) = self.registry.drop_execution(plan.id(), false) {
            tracing::debug!(error = %err, "leaving completed execution for retention");
        }
        Ok(set)
    }
}

// A blocking retrieval returns only once its execution is terminal.
fn completed(set: ResultSet) -> Result<ResultSet, CommandError> {
    if set.status.is_terminal() {
        return Ok(set);
    }
    tracing::error!(execution = %set.id, status = %set.status, "blocking retrieval returned early");

    Err(CommandError::Internal(anyhow::anyhow!(
        "execution {} was delivered while {}",
        set.id,
        set.status
    )))
}

// Invocation of a registration by a terminal execution.
fn invocation(set: &ResultSet) -> Invocation {
    if set.status == execution::Status::Aborted {
        return Invocation::Aborted;
    }
    match set.errors.first().map(|error| &**error) {
        Some(Record::Error(message)) => Invocation::Failure(message.clone()),
        Some(other) => Invocation::Failure(format!("{other:?}")),
        None => Invocation::Success,
    }
}

/// Reply to a completed registration: OK, or an error per failed member.
pub fn registration_reply(outcome: &RegistrationOutcome) -> Reply {
    match outcome.state {
        RegistrationState::Committed => Reply::Ok,
        _ => Reply::Array(
            outcome
                .failures
                .iter()
                .map(|failure| Reply::error(format!("{}: {}", failure.node, failure.reason)))
                .collect(),
        ),
    }
}
