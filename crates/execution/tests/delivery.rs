use execution::{delivery, scripted::ScriptedEngine, Client, DeliveryError, PipelineSpec, Registry, Status};
use model::{NodeId, Record};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn registry() -> Registry {
    Registry::new(NodeId::new("n1").unwrap(), Arc::new(ScriptedEngine), 100)
}

#[tokio::test(start_paused = true)]
async fn test_polling_sees_a_prefix_and_blocking_sees_everything() {
    let registry = registry();
    let plan = registry.create(PipelineSpec::new("emit 1 2; sleep 1s; emit 3; fail boom"));

    // The script runs until it sleeps.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let partial = delivery::immediate(&plan);
    assert_eq!(partial.status, Status::Running);
    assert_eq!(
        partial.results,
        vec![Arc::new(Record::Long(1)), Arc::new(Record::Long(2))]
    );
    assert!(partial.errors.is_empty());

    let full = delivery::blocking(&plan, &Client::new(1), None)
        .await
        .unwrap();

    insta::assert_snapshot!(full.to_reply(), @r###"
    1) 1) (integer) 1
       2) (integer) 2
       3) (integer) 3
    2) 1) "boom"
    3) done
    "###);

    // Once terminal, both delivery modes produce identical replies.
    assert_eq!(
        delivery::immediate(&plan).to_reply().to_bytes(),
        full.to_reply().to_bytes()
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_releases_the_client_but_not_the_execution() {
    let registry = registry();
    let plan = registry.create(PipelineSpec::new("sleep 10s; emit finished"));
    let client = Client::new(1);

    let waiter = {
        let (plan, client) = (plan.clone(), client.clone());
        tokio::spawn(async move { delivery::blocking(&plan, &client, None).await })
    };
    while plan.waiters() == 0 {
        tokio::task::yield_now().await;
    }

    client.disconnect();
    assert!(matches!(
        waiter.await.unwrap(),
        Err(DeliveryError::Cancelled { client: 1, .. })
    ));
    assert_eq!(plan.waiters(), 0);
    assert_eq!(plan.status(), Status::Running);

    let set = delivery::blocking(&plan, &Client::new(2), None)
        .await
        .unwrap();
    assert_eq!(set.status, Status::Done);
    assert_eq!(set.results, vec![Record::string("finished")]);
}

#[tokio::test(start_paused = true)]
async fn test_blocking_timeout() {
    let registry = registry();
    let plan = registry.create(PipelineSpec::new("emit 1; sleep 1m"));

    let err = delivery::blocking(&plan, &Client::new(1), Some(Duration::from_secs(5)))
        .await
        .unwrap_err();
    insta::assert_snapshot!(err, @"timed out after 5s waiting for execution n1-1 to complete");

    assert_eq!(plan.waiters(), 0);
    assert_eq!(plan.status(), Status::Running);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_waiters_observe_one_completion() {
    let registry = registry();
    let plan = registry.create(PipelineSpec::new("sleep 1s; emit x"));

    let clients: Vec<_> = (1..=5).map(Client::new).collect();
    let waits = clients
        .iter()
        .map(|client| delivery::blocking(&plan, client, Some(Duration::from_secs(60))));

    let sets = futures::future::join_all(waits).await;
    for set in sets {
        let set = set.unwrap();
        assert_eq!(set.status, Status::Done);
        assert_eq!(set.results, vec![Record::string("x")]);
    }
    assert_eq!(plan.waiters(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_stops_the_script() {
    let registry = registry();
    let plan = registry.create(PipelineSpec::new("emit 1; sleep 1h; emit 2"));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(registry.abort(plan.id()).unwrap(), Status::Aborted);

    let set = delivery::blocking(&plan, &Client::new(1), None)
        .await
        .unwrap();
    assert_eq!(set.status, Status::Aborted);

    // The script task observes the abort and exits without further reports.
    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
    assert_eq!(plan.snapshot().results, vec![Arc::new(Record::Long(1))]);
}

#[tokio::test]
async fn test_unparseable_script_is_a_completed_error() {
    let registry = registry();
    let plan = registry.create(PipelineSpec::new("emit 1; frobnicate"));

    insta::assert_snapshot!(delivery::immediate(&plan).to_reply(), @r###"
    1) (empty array)
    2) 1) "syntax error in statement 2: \"frobnicate\""
    3) done
    "###);
}

#[tokio::test]
async fn test_unsatisfied_requirements() {
    let registry = registry();
    let plan = registry.create(PipelineSpec {
        definition: "emit 1".to_string(),
        requirements: vec!["numpy==".to_string()],
    });

    let set = delivery::immediate(&plan);
    assert_eq!(set.status, Status::Done);
    assert_eq!(
        set.errors,
        vec![Record::error("could not satisfy requirements: \"numpy==\"")]
    );
}
