use std::time::{Duration, Instant};

use tracing::trace;

use super::PoolableConnection;

#[derive(Debug)]
struct Idle<T> {
    at: Instant,
    inner: T,
}

impl<T> Idle<T> {
    fn new(inner: T) -> Self {
        Self {
            at: Instant::now(),
            inner,
        }
    }
}

/// Idle connections to a single origin, most recently used last.
#[derive(Debug)]
pub(super) struct IdleConnections<T> {
    inner: Vec<Idle<T>>,
}

impl<T> Default for IdleConnections<T> {
    fn default() -> Self {
        Self { inner: Vec::new() }
    }
}

impl<T> IdleConnections<T> {
    pub(super) fn push(&mut self, inner: T) {
        self.inner.push(Idle::new(inner));
    }

    /// Take the most recently used connection which is still open.
    ///
    /// Connections idle for longer than `idle_timeout` are dropped, along
    /// with every connection older than them.
    pub(super) fn pop(&mut self, idle_timeout: Option<Duration>) -> Option<T>
    where
        T: PoolableConnection,
    {
        let expired = idle_timeout
            .filter(|timeout| !timeout.is_zero())
            .and_then(|timeout| Instant::now().checked_sub(timeout));

        trace!("checking {} idle connections", self.len());

        while let Some(entry) = self.inner.pop() {
            if expired.is_some_and(|expired| entry.at < expired) {
                trace!("found expired connection");
                self.clear();
                return None;
            }

            if entry.inner.is_open() {
                trace!("found idle connection");
                return Some(entry.inner);
            }

            trace!("found closed connection");
        }

        None
    }

    pub(super) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(super) fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::super::tests::TestConnection;
    use super::*;

    #[test]
    fn pops_most_recent_first() {
        let mut idle = IdleConnections::default();
        idle.push(TestConnection::new(1));
        idle.push(TestConnection::new(2));

        assert_eq!(idle.pop(None).map(|c| c.id), Some(2));
        assert_eq!(idle.pop(None).map(|c| c.id), Some(1));
        assert!(idle.pop(None).is_none());
        assert!(idle.is_empty());
    }

    #[test]
    fn skips_closed_connections() {
        let mut idle = IdleConnections::default();
        idle.push(TestConnection::new(1));
        idle.push(TestConnection::closed(2));

        assert_eq!(idle.pop(None).map(|c| c.id), Some(1));
        assert_eq!(idle.len(), 0);
    }

    #[test]
    fn expired_connections_are_dropped() {
        let mut idle = IdleConnections::default();
        idle.push(TestConnection::new(1));
        idle.push(TestConnection::new(2));

        thread::sleep(Duration::from_millis(10));

        assert!(idle.pop(Some(Duration::from_millis(1))).is_none());
        assert!(idle.is_empty());
    }

    #[test]
    fn zero_timeout_never_expires() {
        let mut idle = IdleConnections::default();
        idle.push(TestConnection::new(1));

        thread::sleep(Duration::from_millis(5));

        assert!(idle.pop(Some(Duration::ZERO)).is_some());
    }
}
