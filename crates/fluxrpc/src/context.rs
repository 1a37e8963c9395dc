//! Ambient per-call context.
//!
//! A [`CallContext`] is established for a task with [`scope`]. Every request
//! made inside the scope carries the context's outbound tags as a MessageTags
//! segment, and tags found on responses are merged into its inbound set.

use std::future::Future;
use std::sync::Arc;

use fluxmeta::MessageTags;
use parking_lot::Mutex;
use tracing::trace;

tokio::task_local! {
    static CONTEXT: CallContext;
}

#[derive(Debug, Default)]
struct ContextInner {
    outbound: MessageTags,
    inbound: Mutex<MessageTags>,
}

/// Shared handle to one call context. Clones see the same inbound tags.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    inner: Arc<ContextInner>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose requests carry `tags`.
    pub fn with_tags(tags: MessageTags) -> Self {
        Self {
            inner: Arc::new(ContextInner { outbound: tags, inbound: Mutex::default() }),
        }
    }

    pub fn outbound_tags(&self) -> &MessageTags {
        &self.inner.outbound
    }

    /// Tags received so far, in arrival order.
    pub fn inbound_tags(&self) -> MessageTags {
        self.inner.inbound.lock().clone()
    }

    pub(crate) fn merge_inbound(&self, tags: &MessageTags) {
        trace!(count = tags.len(), "merged response tags");
        self.inner.inbound.lock().extend(tags);
    }
}

/// Runs `f` with `ctx` as the ambient call context.
pub async fn scope<F: Future>(ctx: CallContext, f: F) -> F::Output {
    CONTEXT.scope(ctx, f).await
}

/// The ambient context of the current task, if any.
pub fn current() -> Option<CallContext> {
    CONTEXT.try_with(CallContext::clone).ok()
}
