use std::time::Instant;

use tracing::trace;

use crate::payload::PayloadBuilder;
use crate::strategy::Outcome;
use crate::transport::Transport;

/// How a unary trial treats failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryPolicy {
    /// one attempt; a failure yields a zero-valued outcome
    Single,
    /// up to `attempts` attempts. Latency covers every attempt and is kept
    /// even when all of them fail
    Retry { attempts: usize },
}

impl UnaryPolicy {
    /// `max_retries` counts total attempts, at least one is always made
    pub fn retry(max_retries: usize) -> Self {
        Self::Retry {
            attempts: max_retries.max(1),
        }
    }
}

pub(crate) async fn run<T, B>(transport: &T, payloads: &B, trial: usize, policy: UnaryPolicy) -> Outcome
where
    T: Transport,
    B: PayloadBuilder<Payload = T::Payload>,
{
    match policy {
        UnaryPolicy::Single => {
            let payload = payloads.request(trial);
            let start = Instant::now();
            match transport.unary_call(payload).await {
                Ok(_) => Outcome::success(start.elapsed()),
                Err(err) => {
                    trace!(trial, %err, "unary call failed");
                    Outcome::failed()
                }
            }
        }
        UnaryPolicy::Retry { attempts } => {
            let start = Instant::now();
            for attempt in 0..attempts {
                match transport.unary_call(payloads.request(trial)).await {
                    Ok(_) => return Outcome::success(start.elapsed()),
                    Err(err) => trace!(trial, attempt, %err, "unary attempt failed"),
                }
            }
            Outcome {
                latency: start.elapsed(),
                ..Outcome::failed()
            }
        }
    }
}
