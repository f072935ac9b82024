use std::time::{Duration, Instant};

use tracing::trace;

use crate::payload::PayloadBuilder;
use crate::strategy::Outcome;
use crate::transport::{ServerStream, Transport, TransportError};

/// Send one request and count replies until the stream ends. Hitting the
/// deadline ends the trial like a clean end of stream does.
pub(crate) async fn run<T, B>(
    transport: &T,
    payloads: &B,
    trial: usize,
    timeout: Option<Duration>,
) -> Outcome
where
    T: Transport,
    B: PayloadBuilder<Payload = T::Payload>,
{
    let payload = payloads.request(trial);
    let deadline = timeout.map(|timeout| tokio::time::Instant::now() + timeout);

    let mut stream = match transport.open_server_stream(timeout).await {
        Ok(stream) => stream,
        Err(err) => {
            trace!(trial, %err, "failed to open server stream");
            return Outcome::failed();
        }
    };

    let start = Instant::now();
    if let Err(err) = stream.send(payload).await {
        trace!(trial, %err, "server stream send failed");
        return Outcome::failed();
    }
    if let Err(err) = stream.close_send().await {
        trace!(trial, %err, "server stream close failed");
        return Outcome::failed();
    }

    let mut events = 0usize;
    loop {
        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, stream.recv()).await {
                Ok(next) => next,
                Err(_) => Err(TransportError::DeadlineExceeded),
            },
            None => stream.recv().await,
        };
        match next {
            Ok(Some(_)) => events += 1,
            Ok(None) => break,
            Err(err) if err.is_deadline() => {
                trace!(trial, events, "server stream hit deadline");
                break;
            }
            Err(err) => {
                trace!(trial, events, %err, "server stream recv failed");
                return Outcome::failed();
            }
        }
    }

    Outcome::streamed(start.elapsed(), events)
}
