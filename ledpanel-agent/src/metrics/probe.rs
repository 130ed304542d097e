use futures::future::BoxFuture;
use std::collections::BTreeMap;

use super::Signal;

/// Probe failures. Any of these makes the candidate count as "no value".
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unparseable reading: {0:?}")]
    Parse(String),
    #[error("not supported on this platform")]
    Unsupported,
    #[error(transparent)]
    Command(#[from] anyhow::Error),
    #[error("probe task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// `Ok(None)` means the backend exists but has nothing to report
pub type ProbeFuture<'a> = BoxFuture<'a, Result<Option<f64>, ProbeError>>;

/// A platform-specific way of reading one telemetry signal
pub trait MetricProbe: Send + Sync {
    fn name(&self) -> &str;

    fn read(&self) -> ProbeFuture<'_>;
}

/// Ordered candidate lists per signal, highest priority first
pub type Candidates = BTreeMap<Signal, Vec<Box<dyn MetricProbe>>>;

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted probes for registry, cache and scheduler tests

    use super::*;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy)]
    pub(crate) enum Reply {
        Value(f64),
        Empty,
        Fail,
    }

    /// Replays `replies` in order, repeating the last one forever
    pub(crate) struct StubProbe {
        name: String,
        replies: Mutex<VecDeque<Reply>>,
        delay: Option<Duration>,
        calls: Arc<AtomicUsize>,
    }

    impl StubProbe {
        pub(crate) fn new(name: &str, replies: Vec<Reply>) -> Self {
            Self {
                name: name.to_string(),
                replies: Mutex::new(replies.into()),
                delay: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn value(name: &str, value: f64) -> Self {
            Self::new(name, vec![Reply::Value(value)])
        }

        pub(crate) fn failing(name: &str) -> Self {
            Self::new(name, vec![Reply::Fail])
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
            self.calls.clone()
        }

        fn next_reply(&self) -> Reply {
            let mut replies = self.replies.lock();
            if replies.len() > 1 {
                replies.pop_front().unwrap_or(Reply::Fail)
            } else {
                replies.front().copied().unwrap_or(Reply::Fail)
            }
        }
    }

    impl MetricProbe for StubProbe {
        fn name(&self) -> &str {
            &self.name
        }

        fn read(&self) -> ProbeFuture<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.next_reply();
            let delay = self.delay;
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                match reply {
                    Reply::Value(v) => Ok(Some(v)),
                    Reply::Empty => Ok(None),
                    Reply::Fail => Err(ProbeError::Parse("scripted failure".into())),
                }
            }
            .boxed()
        }
    }

    pub(crate) fn boxed(probe: StubProbe) -> Box<dyn MetricProbe> {
        Box::new(probe)
    }
}
