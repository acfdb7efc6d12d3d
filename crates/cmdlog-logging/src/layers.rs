//! Custom tracing layers and formatter construction

use tracing::{Subscriber, span};
use tracing_subscriber::{
    fmt::{
        self, MakeWriter,
        format::{Format, Json, JsonFields},
    },
    layer::{Context, Layer},
    registry::{LookupSpan, SpanRef},
};

use crate::config::JsonlConfig;
use crate::context::{NodeContextData, NodeContextGuard};

/// Layer that attaches the active node context to new spans
///
/// When a [`NodeContextGuard`] is active, every span created on that thread
/// carries a [`NodeContextExtension`]. Other layers read it back with
/// [`NodeContextLayer::lookup`].
pub struct NodeContextLayer;

impl NodeContextLayer {
    /// Create a new node context layer
    pub fn new() -> Self {
        Self
    }

    /// Node context of `span` or its nearest ancestor that has one
    pub fn lookup<S>(span: &SpanRef<'_, S>) -> Option<NodeContextData>
    where
        S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    {
        span.scope().find_map(|s| {
            s.extensions()
                .get::<NodeContextExtension>()
                .map(|ext| ext.data.clone())
        })
    }
}

impl Default for NodeContextLayer {
    fn default() -> Self {
        Self::new()
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct NodeContextExtension {
    pub data: NodeContextData,
}

impl<S> Layer<S> for NodeContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if let (Some(span), Some(node)) = (ctx.span(id), NodeContextGuard::current()) {
            span.extensions_mut()
                .insert(NodeContextExtension { data: node });
        }
    }
}

/// Create a JSONL formatting layer
///
/// Configures tracing-subscriber's JSON formatter from a [`JsonlConfig`],
/// writing to any `MakeWriter`.
pub fn jsonl_layer<S, W>(
    config: &JsonlConfig,
    writer: W,
) -> fmt::Layer<S, JsonFields, Format<Json>, W>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    fmt::layer()
        .json()
        .with_current_span(config.include_current_span)
        .with_span_list(config.include_spans)
        .flatten_event(config.flatten_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread_info)
        .with_thread_names(config.include_thread_info)
        .with_writer(writer)
}
