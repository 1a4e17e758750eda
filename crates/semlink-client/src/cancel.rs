use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use semlink_transport::SemStream;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Cloneable cancellation signal shared by a client and its callers.
///
/// Every socket the client opens is registered here. [`CancelToken::cancel`]
/// shuts those sockets down so a read blocked on the instrument returns
/// immediately; deadline loops also poll [`CancelToken::check`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    streams: Mutex<Vec<SemStream>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation and unblock every registered socket.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("cancellation requested");
        self.shutdown_streams();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ClientError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Track a socket so cancellation can shut it down.
    ///
    /// A socket registered after cancellation is shut down right away.
    pub fn register(&self, stream: &SemStream) -> Result<()> {
        let clone = stream.try_clone()?;
        if self.is_cancelled() {
            let _ = clone.shutdown();
            return Err(ClientError::Cancelled);
        }
        let mut streams = self
            .inner
            .streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        streams.push(clone);
        Ok(())
    }

    fn shutdown_streams(&self) {
        let streams = {
            let mut guard = self
                .inner
                .streams
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        for stream in streams {
            let _ = stream.shutdown();
        }
    }
}
