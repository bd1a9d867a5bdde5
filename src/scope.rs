//! Cancellable lifetime scopes.
//!
//! A [`Scope`] bounds how long a client, its connections and its in-flight
//! requests remain valid. Scopes form a tree: cancelling a scope cancels all of
//! the scopes derived from it, but never its parent.
//!
//! Cancellation is cooperative. Blocking operations opt in by running through
//! [`Scope::run`], which races the operation against cancellation.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::watch;

use crate::BoxFuture;

/// Error returned when an operation is abandoned because its scope was cancelled.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("scope cancelled")]
pub struct Cancelled;

/// A cancellable handle representing how long some work remains valid.
///
/// Cloning a scope produces another handle to the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    state: watch::Sender<bool>,
    parent: Option<Scope>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("cancelled", &self.is_cancelled())
            .field("root", &self.inner.parent.is_none())
            .finish()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::background()
    }
}

impl Scope {
    /// A root scope, which is only cancelled by calling [`Scope::cancel`] on it.
    pub fn background() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<Scope>) -> Self {
        let (state, _) = watch::channel(false);
        Self {
            inner: Arc::new(ScopeInner { state, parent }),
        }
    }

    /// Derive a scope which is cancelled along with this one.
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    /// Cancel this scope and every scope derived from it.
    ///
    /// Cancelling an already cancelled scope does nothing.
    pub fn cancel(&self) {
        let changed = self.inner.state.send_if_modified(|cancelled| {
            let was = *cancelled;
            *cancelled = true;
            !was
        });

        if changed {
            tracing::trace!("scope cancelled");
        }
    }

    /// Whether this scope, or any scope it was derived from, has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.state.borrow()
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(|parent| parent.is_cancelled())
    }

    /// A future which resolves once this scope is cancelled.
    pub fn cancelled(&self) -> Cancellation {
        let receiver = self.inner.state.subscribe();
        let parent = self.inner.parent.clone();

        // Holds the sender alive for as long as the future is pending.
        let owner = self.clone();

        Cancellation(Box::pin(async move {
            let _owner = owner;
            match parent {
                Some(parent) => {
                    tokio::select! {
                        _ = wait_for_cancel(receiver) => {},
                        _ = parent.cancelled() => {},
                    }
                }
                None => wait_for_cancel(receiver).await,
            }
        }))
    }

    /// Run a future to completion, unless this scope is cancelled first.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            output = future => Ok(output),
        }
    }
}

async fn wait_for_cancel(mut receiver: watch::Receiver<bool>) {
    loop {
        if *receiver.borrow_and_update() {
            return;
        }

        if receiver.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Future returned by [`Scope::cancelled`].
#[must_use = "futures do nothing unless polled"]
pub struct Cancellation(BoxFuture<'static, ()>);

impl fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellation").finish()
    }
}

impl Future for Cancellation {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.as_mut().poll(cx)
    }
}
