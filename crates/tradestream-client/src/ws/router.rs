/*
[INPUT]:  Typed inbound events and caller registered handlers
[OUTPUT]: Ordered, failure-isolated handler invocation per event kind
[POS]:    WebSocket layer - message routing
[UPDATE]: When changing handler registration or failure isolation
*/

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::warn;

use super::message::{EventKind, InboundEvent};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = std::result::Result<(), HandlerError>;

type HandlerFn = dyn Fn(&InboundEvent) -> HandlerResult + Send + Sync;

/// Registered handler; identity is the allocation, so clones refer to the same handler
#[derive(Clone)]
pub struct HandlerRef(Arc<HandlerFn>);

impl HandlerRef {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&InboundEvent) -> HandlerResult + Send + Sync + 'static,
    {
        Self(Arc::new(handler))
    }

    pub fn same_as(&self, other: &HandlerRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn call(&self, event: &InboundEvent) -> HandlerResult {
        (self.0)(event)
    }
}

impl std::fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HandlerRef")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failed: usize,
}

/// Event kind to ordered handler list
#[derive(Debug, Default)]
pub struct MessageRouter {
    handlers: HashMap<EventKind, Vec<HandlerRef>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure; keep the returned ref to remove it later
    pub fn on<F>(&mut self, kind: EventKind, handler: F) -> HandlerRef
    where
        F: Fn(&InboundEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let handler = HandlerRef::new(handler);
        self.register(kind, handler.clone());
        handler
    }

    pub fn register(&mut self, kind: EventKind, handler: HandlerRef) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    /// Remove one registration of `handler`. Absent handlers are a no-op.
    pub fn off(&mut self, kind: EventKind, handler: &HandlerRef) -> bool {
        let Some(list) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let Some(index) = list.iter().position(|existing| existing.same_as(handler)) else {
            return false;
        };
        list.remove(index);
        if list.is_empty() {
            self.handlers.remove(&kind);
        }
        true
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Snapshot of the handlers for `kind`, in registration order
    pub fn handlers_for(&self, kind: EventKind) -> Vec<HandlerRef> {
        self.handlers.get(&kind).cloned().unwrap_or_default()
    }

    pub fn dispatch(&self, event: &InboundEvent) -> DispatchReport {
        let handlers = self.handlers.get(&event.kind()).map_or(&[][..], Vec::as_slice);
        dispatch_to(handlers, event)
    }
}

/// Invoke each handler in order. A handler that errors or panics is logged
/// and counted; the remaining handlers still run.
pub fn dispatch_to(handlers: &[HandlerRef], event: &InboundEvent) -> DispatchReport {
    let mut report = DispatchReport::default();
    for (index, handler) in handlers.iter().enumerate() {
        report.invoked += 1;
        match catch_unwind(AssertUnwindSafe(|| handler.call(event))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                report.failed += 1;
                warn!(event = %event.kind(), handler_index = index, error = %err, "ws handler failed");
            }
            Err(panic) => {
                report.failed += 1;
                warn!(
                    event = %event.kind(),
                    handler_index = index,
                    panic = panic_message(panic.as_ref()),
                    "ws handler panicked"
                );
            }
        }
    }
    report
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
