use commands::{Commands, Config};
use execution::{scripted, Registry};
use model::NodeId;
use registration::{local, Controller, Registration};
use std::sync::Arc;

/// Installer of registrations whose functions are scripts of the ScriptedEngine.
struct ScriptInstaller;

impl registration::Installer for ScriptInstaller {
    fn install(&self, registration: &Registration) -> anyhow::Result<()> {
        let steps = scripted::parse(&registration.payload().function)?;
        tracing::debug!(registration = %registration.id(), steps = steps.len(), "installed script");
        Ok(())
    }
}

/// Member of the in-process cluster.
pub struct Node {
    pub id: NodeId,
    pub commands: Arc<Commands>,
}

/// Start an in-process cluster of `size` members. Must be called within a tokio runtime.
pub fn start(size: usize, config: &Config) -> Vec<Node> {
    let cluster = local::LocalCluster::new();

    let joined: Vec<_> = (0..size)
        .map(|_| {
            let id = NodeId::random();
            let (transport, inbox) = cluster.join(id.clone());
            (id, transport, inbox)
        })
        .collect();

    joined
        .into_iter()
        .map(|(id, transport, inbox)| {
            let registry = Registry::new(
                id.clone(),
                Arc::new(scripted::ScriptedEngine),
                config.max_executions,
            );
            let controller = Controller::new(
                id.clone(),
                transport,
                Arc::new(ScriptInstaller),
                config.registration_ack_timeout,
            );
            tokio::spawn(local::serve(controller.clone(), inbox));

            tracing::info!(node = %id, "started cluster member");
            let commands = Commands::new(Arc::new(registry), controller, config.clone());

            Node {
                id,
                commands: Arc::new(commands),
            }
        })
        .collect()
}

/// Abort and release all executions of every member.
pub fn shutdown(nodes: &[Node]) {
    for node in nodes {
        let aborted = node.commands.registry().shutdown();
        tracing::debug!(node = %node.id, aborted, "member shut down");
    }
}
