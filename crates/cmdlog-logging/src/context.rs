//! Node context injection for multi-node logging
//!
//! Several nodes of one cluster often share a process in tests and
//! simulation. This module keeps the current node's identity in thread-local
//! storage so spans created in its scope can be attributed to it.

use std::cell::RefCell;

use tracing::Span;
use uuid::Uuid;

/// Node context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContextData {
    /// Name of the node, e.g. `node-2`
    pub node_id: String,
    /// Unique instance ID for this node session
    pub instance_id: Uuid,
}

thread_local! {
    static NODE_CONTEXT: RefCell<Option<NodeContextData>> = const { RefCell::new(None) };
}

/// RAII guard for node context
///
/// Creating the guard sets the node context for the current thread. Dropping
/// it restores the previous context (if any).
///
/// # Example
///
/// ```ignore
/// use cmdlog_logging::NodeContextGuard;
///
/// let guard = NodeContextGuard::new("node-1");
/// let span = guard.span();
/// let _enter = span.enter();
///
/// tracing::info!("Replaying command log");
/// ```
pub struct NodeContextGuard {
    previous: Option<NodeContextData>,
}

impl NodeContextGuard {
    /// Set the node identity for the current scope
    pub fn new(node_id: impl Into<String>) -> Self {
        Self::with_instance_id(node_id, Uuid::new_v4())
    }

    /// Create a guard with a specific instance ID
    ///
    /// Useful to keep one instance ID across a simulated restart.
    pub fn with_instance_id(node_id: impl Into<String>, instance_id: Uuid) -> Self {
        let previous = Self::current();
        let data = NodeContextData {
            node_id: node_id.into(),
            instance_id,
        };
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = Some(data));
        Self { previous }
    }

    /// Get the current node context (if any)
    pub fn current() -> Option<NodeContextData> {
        NODE_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// Get the current node ID (if set)
    pub fn current_node_id() -> Option<String> {
        Self::current().map(|ctx| ctx.node_id)
    }

    /// Get the current instance ID (if set)
    pub fn current_instance_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.instance_id)
    }

    /// A `node` span carrying this context as fields
    ///
    /// Tasks spawned inside the span keep the fields in their JSONL output
    /// after they move to another worker thread.
    pub fn span(&self) -> Span {
        match Self::current() {
            Some(ctx) => tracing::info_span!(
                "node",
                node_id = %ctx.node_id,
                instance_id = %ctx.instance_id
            ),
            None => Span::none(),
        }
    }
}

impl Drop for NodeContextGuard {
    fn drop(&mut self) {
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block with a node context set
///
/// # Example
///
/// ```ignore
/// with_node_context!("node-1", {
///     tracing::info!("Sending command");
/// });
/// ```
#[macro_export]
macro_rules! with_node_context {
    ($node_id:expr, $body:block) => {{
        let _guard = $crate::context::NodeContextGuard::new($node_id);
        $body
    }};
}
