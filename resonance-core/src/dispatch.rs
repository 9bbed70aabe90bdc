//! Message-type keyed handler dispatch.
//!
//! Both inbound paths (bus consumer and socket spoke) look handlers up in a
//! [`HandlerTable`]. At most one handler exists per [`MessageType`]; a second
//! registration replaces the first. A handler that returns an error or
//! panics is contained here and reported as [`Dispatch::Failed`].

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use resonance_types::{Envelope, MessageType};
use thiserror::Error;

/// A registered callback.
pub type Handler = Arc<dyn Fn(&Envelope) -> Result<(), HandlerError> + Send + Sync>;

/// Failure raised by a handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Handler reported a failure.
    #[error("handler failed: {0}")]
    Failed(String),

    /// Handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Convenience constructor for [`HandlerError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Outcome of dispatching one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The registered handler ran to completion.
    Handled,
    /// The registered handler failed; the envelope is dropped.
    Failed(HandlerError),
    /// No handler is registered for this type.
    Unhandled,
}

/// Message-type keyed handler table.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<MessageType, Handler>,
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort();
        f.debug_struct("HandlerTable")
            .field("types", &types)
            .finish()
    }
}

impl HandlerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for `message_type`.
    ///
    /// Returns `true` if an earlier handler was replaced.
    pub fn register<F>(&mut self, message_type: MessageType, handler: F) -> bool
    where
        F: Fn(&Envelope) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.handlers
            .insert(message_type, Arc::new(handler))
            .is_some()
    }

    /// Remove the handler for `message_type`, if any.
    pub fn remove(&mut self, message_type: MessageType) -> bool {
        self.handlers.remove(&message_type).is_some()
    }

    /// Look up the handler for `message_type`.
    ///
    /// The returned `Arc` can be invoked after any lock guarding the table
    /// has been released.
    pub fn get(&self, message_type: MessageType) -> Option<Handler> {
        self.handlers.get(&message_type).cloned()
    }

    /// Whether a handler is registered for `message_type`.
    pub fn contains(&self, message_type: MessageType) -> bool {
        self.handlers.contains_key(&message_type)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler registered for the envelope's type.
    pub fn dispatch(&self, envelope: &Envelope) -> Dispatch {
        match self.get(envelope.message_type()) {
            Some(handler) => invoke(&handler, envelope),
            None => Dispatch::Unhandled,
        }
    }
}

/// Invoke a single handler, containing errors and panics.
pub fn invoke(handler: &Handler, envelope: &Envelope) -> Dispatch {
    match catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
        Ok(Ok(())) => Dispatch::Handled,
        Ok(Err(e)) => Dispatch::Failed(e),
        Err(payload) => Dispatch::Failed(HandlerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
