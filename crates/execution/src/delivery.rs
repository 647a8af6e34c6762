//! Delivery of an execution's results and errors to a client,
//! either immediately (polling) or after blocking until it terminates.
use crate::{Client, ClientId, ExecutionPlan, Status};
use model::{ExecutionId, Record, RecordRef, Reply};
use std::time::Duration;

/// ResultSet is a point-in-time view of an execution's results and errors,
/// each in the order they were reported.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub id: ExecutionId,
    pub status: Status,
    pub results: Vec<RecordRef>,
    pub errors: Vec<RecordRef>,
}

impl ResultSet {
    /// Encode as `[[results...], [errors...], status]`.
    /// Errors are rendered as their message text.
    pub fn to_reply(&self) -> Reply {
        let results = self.results.iter().map(|r| r.to_reply()).collect();
        let errors = self
            .errors
            .iter()
            .map(|r| match r.as_ref() {
                Record::Error(message) => Reply::from(message.as_str()),
                other => other.to_reply(),
            })
            .collect();

        Reply::Array(vec![
            Reply::Array(results),
            Reply::Array(errors),
            Reply::simple(self.status.as_str()),
        ])
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("timed out after {timeout:?} waiting for execution {id} to complete")]
    Timeout { id: ExecutionId, timeout: Duration },
    #[error("client {client} disconnected while waiting for execution {id}")]
    Cancelled { id: ExecutionId, client: ClientId },
}

/// Return whatever has been accumulated so far, without waiting.
pub fn immediate(plan: &ExecutionPlan) -> ResultSet {
    plan.snapshot()
}

/// Block until the execution terminates, then return its results.
#[tracing::instrument(level = "debug", skip_all, fields(execution = %plan.id(), client = client.id()))]
pub async fn blocking(
    plan: &ExecutionPlan,
    client: &Client,
    timeout: Option<Duration>,
) -> Result<ResultSet, DeliveryError> {
    let _status = plan.wait(client, timeout).await?;
    Ok(plan.snapshot())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::PipelineSpec;
    use model::NodeId;
    use std::sync::Arc;

    #[test]
    fn test_result_set_encoding() {
        let set = ResultSet {
            id: ExecutionId::new(NodeId::new("n").unwrap(), 1),
            status: Status::Done,
            results: vec![
                Record::string("a"),
                Arc::new(Record::Long(2)),
                Arc::new(Record::List(vec![Record::string("c")])),
            ],
            errors: vec![Record::error("division by zero")],
        };

        insta::assert_snapshot!(set.to_reply(), @r###"
        1) 1) "a"
           2) (integer) 2
           3) 1) "c"
        2) 1) "division by zero"
        3) done
        "###);
    }

    #[test]
    fn test_empty_success() {
        let plan = ExecutionPlan::new(
            ExecutionId::new(NodeId::new("n").unwrap(), 1),
            PipelineSpec::default(),
        );
        assert!(plan.start());
        plan.complete().unwrap();

        insta::assert_snapshot!(immediate(&plan).to_reply(), @r###"
        1) (empty array)
        2) (empty array)
        3) done
        "###);
    }
}
