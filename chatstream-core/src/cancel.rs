//! Cooperative cancellation of the read loop.
//!
//! Every read races the caller's token. Once the token fires the source is
//! dropped, which releases the underlying connection, and no further reads
//! are issued. A chunk already handed out is still processed by the caller.

use futures::{Stream, StreamExt};
pub use tokio_util::sync::CancellationToken;

/// Outcome of one read.
#[derive(Debug, PartialEq, Eq)]
pub enum Read<T> {
    Item(T),
    End,
    Cancelled,
}

/// Wraps a chunk source so that each read also watches a cancellation token.
pub struct CancellableReader<S> {
    source: Option<S>,
    token: Option<CancellationToken>,
    cancelled: bool,
}

impl<S> CancellableReader<S>
where
    S: Stream + Unpin,
{
    pub fn new(source: S, token: Option<CancellationToken>) -> Self {
        Self {
            source: Some(source),
            token,
            cancelled: false,
        }
    }

    pub async fn next(&mut self) -> Read<S::Item> {
        if self.cancelled {
            return Read::Cancelled;
        }
        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return self.cancel();
        }
        let Some(source) = self.source.as_mut() else {
            return Read::End;
        };

        let next = match &self.token {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    item = source.next() => Some(item),
                }
            }
            None => Some(source.next().await),
        };

        match next {
            None => self.cancel(),
            Some(Some(item)) => Read::Item(item),
            Some(None) => {
                self.release();
                Read::End
            }
        }
    }

    /// Drop the source. Later reads report `End` (or `Cancelled` if the
    /// token fired first).
    pub fn release(&mut self) {
        self.source = None;
    }

    fn cancel(&mut self) -> Read<S::Item> {
        self.cancelled = true;
        self.release();
        Read::Cancelled
    }
}
