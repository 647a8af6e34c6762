//! An in-process cluster, whose members exchange encoded Messages over channels.
//! Faults may be injected to make members unreachable or silent.
use crate::{Ack, Controller, Message, Transport};
use anyhow::Context;
use bytes::Bytes;
use indexmap::IndexMap;
use model::NodeId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Inbox of encoded Messages sent to a member.
pub type Inbox = mpsc::UnboundedReceiver<Bytes>;

#[derive(Default)]
pub struct LocalCluster {
    members: Mutex<IndexMap<NodeId, mpsc::UnboundedSender<Bytes>>>,
    faults: Mutex<Faults>,
}

#[derive(Default)]
struct Faults {
    // Deliveries to these members fail.
    unreachable: HashSet<NodeId>,
    // Messages sent by these members are silently lost.
    silenced: HashSet<NodeId>,
}

impl LocalCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add `node` as a member, returning its Transport and Inbox.
    pub fn join(self: &Arc<Self>, node: NodeId) -> (Arc<LocalTransport>, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.members.lock().unwrap().insert(node.clone(), tx);

        let transport = LocalTransport {
            node,
            cluster: self.clone(),
        };
        (Arc::new(transport), rx)
    }

    pub fn set_unreachable(&self, node: &NodeId, unreachable: bool) {
        let mut faults = self.faults.lock().unwrap();
        if unreachable {
            faults.unreachable.insert(node.clone());
        } else {
            faults.unreachable.remove(node);
        }
    }

    pub fn set_silenced(&self, node: &NodeId, silenced: bool) {
        let mut faults = self.faults.lock().unwrap();
        if silenced {
            faults.silenced.insert(node.clone());
        } else {
            faults.silenced.remove(node);
        }
    }

    fn deliver(&self, from: &NodeId, to: &NodeId, message: Bytes) -> anyhow::Result<()> {
        {
            let faults = self.faults.lock().unwrap();

            if faults.unreachable.contains(to) {
                anyhow::bail!("connection to {to} refused");
            } else if faults.silenced.contains(from) {
                tracing::debug!(%from, %to, "dropping message of a silenced member");
                return Ok(());
            }
        }

        let members = self.members.lock().unwrap();
        let tx = members
            .get(to)
            .with_context(|| format!("{to} is not a member of the cluster"))?;

        tx.send(message)
            .map_err(|_| anyhow::anyhow!("{to} has left the cluster"))
    }
}

/// LocalTransport is the Transport of one LocalCluster member.
pub struct LocalTransport {
    node: NodeId,
    cluster: Arc<LocalCluster>,
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    fn members(&self) -> Vec<NodeId> {
        self.cluster.members.lock().unwrap().keys().cloned().collect()
    }

    async fn broadcast(&self, message: Message) -> Vec<(NodeId, anyhow::Result<()>)> {
        let encoded = message.to_bytes();

        self.members()
            .into_iter()
            .filter(|node| node != &self.node)
            .map(|node| {
                let result = self.cluster.deliver(&self.node, &node, encoded.clone());
                (node, result)
            })
            .collect()
    }

    async fn send_ack(&self, node: &NodeId, ack: Ack) -> anyhow::Result<()> {
        self.cluster
            .deliver(&self.node, node, Message::Ack(ack).to_bytes())
    }
}

/// Serve Messages of the `inbox` to the `controller` until the cluster is dropped.
pub async fn serve(controller: Controller, mut inbox: Inbox) {
    while let Some(encoded) = inbox.recv().await {
        match Message::from_bytes(&encoded) {
            Ok(message) => controller.on_message(message).await,
            Err(err) => tracing::warn!(node = %controller.node(), error = ?err, "discarding malformed message"),
        }
    }
}
