//! # Task Graph
//!
//! Arena dei nodi directory/container con link per indice.
//!
//! Ogni nodo conserva gli handle dei task figli ancora in sospeso. Un nodo
//! viene finalizzato solo dopo tutti i suoi nodi figli, così la
//! finalizzazione procede dal basso verso l'alto.

use super::pool::TaskHandle;
use std::path::PathBuf;
use tracing::{debug, warn};

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    Container,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Open,
    Finalized,
}

/// A handle waiting on a node; `slot` is the member index inside a container
pub struct Pending {
    pub slot: Option<usize>,
    pub handle: TaskHandle,
}

struct Node {
    kind: NodeKind,
    path: PathBuf,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    pending: Vec<Pending>,
    state: NodeState,
}

/// Tree of directories and containers being walked
#[derive(Default)]
pub struct TaskGraph {
    nodes: Vec<Node>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: NodeKind, path: PathBuf, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            path,
            parent,
            children: Vec::new(),
            pending: Vec::new(),
            state: NodeState::Open,
        });
        if let Some(parent) = parent {
            self.nodes[parent].children.push(id);
        }
        id
    }

    pub fn register(&mut self, node: NodeId, slot: Option<usize>, handle: TaskHandle) {
        self.nodes[node].pending.push(Pending { slot, handle });
    }

    /// Close a node and hand back its pending handles
    pub fn finalize(&mut self, node: NodeId) -> Vec<Pending> {
        let open_children = self.nodes[node]
            .children
            .iter()
            .filter(|&&child| self.nodes[child].state == NodeState::Open)
            .count();
        if open_children > 0 {
            warn!(
                "⚠️ {} finalized with {} open children",
                self.nodes[node].path.display(),
                open_children
            );
        }
        let parent = self.nodes[node].parent.map(|p| self.nodes[p].path.display().to_string());
        let node = &mut self.nodes[node];
        debug!(
            "🏁 {:?} {} (in {}) finalized with {} pending task(s)",
            node.kind,
            node.path.display(),
            parent.as_deref().unwrap_or("-"),
            node.pending.len()
        );
        node.state = NodeState::Finalized;
        std::mem::take(&mut node.pending)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::TaskOutput;
    use crate::optimizer::pool::TaskPool;
    use crate::report::ReportStats;

    #[tokio::test]
    async fn test_finalize_takes_pending_handles() {
        let pool = TaskPool::new(2);
        let mut graph = TaskGraph::new();
        let root = graph.add(NodeKind::Directory, PathBuf::from("/a"), None);
        let zip = graph.add(NodeKind::Container, PathBuf::from("/a/c.zip"), Some(root));

        let handle = pool.submit("x.png".to_string(), 1, async {
            TaskOutput {
                report: ReportStats::new("x.png", 1, 1),
                path_info: None,
                changed: false,
            }
        });
        graph.register(zip, Some(3), handle);

        let pending = graph.finalize(zip);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].slot, Some(3));
        assert!(graph.finalize(zip).is_empty());

        let output = pending.into_iter().next().unwrap().handle.resolve().await;
        assert_eq!(output.report.path, "x.png");

        assert!(graph.finalize(root).is_empty());
        assert_eq!(graph.len(), 2);
    }
}
