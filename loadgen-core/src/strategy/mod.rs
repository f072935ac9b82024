//! Interaction mode strategies. Each executes exactly one trial against a
//! shared transport and yields one [`Outcome`]; transport errors never escape.
use std::{sync::Arc, time::Duration};

use crate::config::{LoadJobSpec, Mode};
use crate::payload::{PayloadBuilder, UploadSource};
use crate::transport::Transport;

pub mod client_stream;
pub mod event_stream;
pub mod server_stream;
pub mod unary;

pub use unary::UnaryPolicy;

/// size of each chunk a client-stream trial uploads
pub const CHUNK_SIZE: usize = 1024;

/// result of one trial
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Outcome {
    pub latency: Duration,
    pub successful: bool,
    pub events: usize,
    pub streaming: bool,
}

impl Outcome {
    /// zero-valued, unsuccessful outcome
    pub fn failed() -> Self {
        Self::default()
    }

    pub fn success(latency: Duration) -> Self {
        Self {
            latency,
            successful: true,
            ..Self::default()
        }
    }

    pub fn streamed(latency: Duration, events: usize) -> Self {
        Self {
            latency,
            successful: true,
            events,
            streaming: true,
        }
    }

    pub fn latency_secs(&self) -> f64 {
        self.latency.as_secs_f64()
    }
}

/// One variant per interaction mode, chosen once per run
#[derive(Clone)]
pub enum Strategy {
    Unary(UnaryPolicy),
    ClientStream { source: Arc<dyn UploadSource> },
    ServerStream { timeout: Option<Duration> },
    EventStream { max_retries: usize },
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unary(policy) => f.debug_tuple("Unary").field(policy).finish(),
            Self::ClientStream { .. } => f.debug_struct("ClientStream").finish_non_exhaustive(),
            Self::ServerStream { timeout } => f
                .debug_struct("ServerStream")
                .field("timeout", timeout)
                .finish(),
            Self::EventStream { max_retries } => f
                .debug_struct("EventStream")
                .field("max_retries", max_retries)
                .finish(),
        }
    }
}

impl Strategy {
    /// strategy for `job.mode`. `unary` picks the unary retry behaviour of the
    /// protocol and `upload` is required for client-stream jobs
    pub fn for_job(
        job: &LoadJobSpec,
        unary: UnaryPolicy,
        upload: Option<Arc<dyn UploadSource>>,
    ) -> anyhow::Result<Self> {
        Ok(match job.mode {
            Mode::Unary => Self::Unary(unary),
            Mode::ClientStream => Self::ClientStream {
                source: upload
                    .ok_or_else(|| anyhow::anyhow!("client stream job needs an upload source"))?,
            },
            Mode::ServerStream => Self::ServerStream {
                timeout: job.timeout(),
            },
            Mode::EventStream => Self::EventStream {
                max_retries: job.max_retries,
            },
        })
    }

    pub const fn mode(&self) -> Mode {
        match self {
            Self::Unary(_) => Mode::Unary,
            Self::ClientStream { .. } => Mode::ClientStream,
            Self::ServerStream { .. } => Mode::ServerStream,
            Self::EventStream { .. } => Mode::EventStream,
        }
    }

    pub async fn execute<T, B>(&self, transport: &T, payloads: &B, trial: usize) -> Outcome
    where
        T: Transport,
        B: PayloadBuilder<Payload = T::Payload>,
    {
        match self {
            Self::Unary(policy) => unary::run(transport, payloads, trial, *policy).await,
            Self::ClientStream { source } => {
                client_stream::run(transport, payloads, source.as_ref()).await
            }
            Self::ServerStream { timeout } => {
                server_stream::run(transport, payloads, trial, *timeout).await
            }
            Self::EventStream { max_retries } => event_stream::run(transport, *max_retries).await,
        }
    }
}
