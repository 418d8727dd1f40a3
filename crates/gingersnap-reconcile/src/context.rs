//! Per-attempt mutation context
//!
//! One [`Context`] is built for every reconciliation attempt and threaded
//! through all steps. It carries the scoped [`Client`], the attempt span, at
//! most one requeue decision and the controller's typed data slots.

use std::time::Duration;

use tokio::time::Instant;
use tracing::Span;

use crate::client::Client;
use crate::error::ReconcileError;

/// Proof that a step asked the pipeline to stop
///
/// Only [`Context::requeue`] and [`Context::requeue_after`] create one, so a
/// step can stop the pipeline only by recording a requeue first.
#[derive(Debug)]
#[must_use = "return the Halt from the step to stop the pipeline"]
pub struct Halt {
    _private: (),
}

/// Requeue decision recorded on a context
#[derive(Debug)]
pub struct Requeue {
    /// Delay before the next attempt
    pub delay: Duration,
    /// Error to report, if the retry is caused by a failure
    pub error: Option<ReconcileError>,
}

/// Mutation context for one attempt
pub struct Context<D> {
    client: Client,
    span: Span,
    requeue: Option<Requeue>,
    data: D,
}

impl<D> Context<D> {
    /// Create a context around `client` with the given attempt span
    pub fn new(client: Client, span: Span, data: D) -> Self {
        Self {
            client,
            span,
            requeue: None,
            data,
        }
    }

    /// Scoped client for this attempt
    #[inline]
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Attempt span
    #[inline]
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Attempt deadline
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.client.deadline()
    }

    /// Check whether the deadline has passed
    #[must_use]
    pub fn deadline_expired(&self) -> bool {
        self.deadline().is_some_and(|d| Instant::now() >= d)
    }

    /// Record a retry caused by `err`
    ///
    /// A resource-version conflict becomes an immediate retry without an
    /// error, so it does not grow the backoff. Only the first requeue of an
    /// attempt is kept.
    pub fn requeue(&mut self, err: ReconcileError) -> Halt {
        if self.requeue.is_none() {
            self.requeue = Some(if err.is_conflict() {
                tracing::debug!(parent: &self.span, error = %err, "conflict, retrying immediately");
                Requeue {
                    delay: Duration::ZERO,
                    error: None,
                }
            } else {
                Requeue {
                    delay: Duration::ZERO,
                    error: Some(err),
                }
            });
        }
        Halt { _private: () }
    }

    /// Record a retry after `delay` without an error
    pub fn requeue_after(&mut self, delay: Duration) -> Halt {
        if self.requeue.is_none() {
            self.requeue = Some(Requeue { delay, error: None });
        }
        Halt { _private: () }
    }

    /// Check whether a requeue has been recorded
    #[inline]
    #[must_use]
    pub fn requeue_requested(&self) -> bool {
        self.requeue.is_some()
    }

    /// Controller data slots
    #[inline]
    pub fn data(&self) -> &D {
        &self.data
    }

    /// Controller data slots, mutable
    #[inline]
    pub fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }

    pub(crate) fn take_requeue(&mut self) -> Option<Requeue> {
        self.requeue.take()
    }
}

/// Named typed slot for data passed between steps
#[derive(Debug, Clone)]
pub struct Slot<T> {
    name: &'static str,
    value: Option<T>,
}

impl<T> Slot<T> {
    /// Empty slot called `name`
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name, value: None }
    }

    /// Store a value, replacing any earlier one
    pub fn fill(&mut self, value: T) {
        self.value = Some(value);
    }

    /// Read the value
    ///
    /// # Errors
    /// `ReconcileError::MissingSlot` when no step filled the slot.
    pub fn get(&self) -> Result<&T, ReconcileError> {
        self.value
            .as_ref()
            .ok_or(ReconcileError::MissingSlot { slot: self.name })
    }

    /// Check if the slot holds a value
    #[inline]
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.value.is_some()
    }

    /// Slot name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}
