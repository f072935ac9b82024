use std::time::Instant;

use tracing::trace;

use crate::strategy::Outcome;
use crate::transport::{EventStream, Transport};

/// prefix of an SSE data line
const DATA_PREFIX: &str = "data:";

/// `data:` followed by at least one character besides the line terminator
fn is_event(line: &str) -> bool {
    line.len() > DATA_PREFIX.len() + 1 && line.starts_with(DATA_PREFIX)
}

/// Read the stream line by line, counting data lines. Only the initial
/// connect can fail the trial; read errors are retried `max_retries`
/// consecutive times and then the loop is abandoned.
pub(crate) async fn run<T: Transport>(transport: &T, max_retries: usize) -> Outcome {
    let start = Instant::now();
    let mut stream = match transport.open_event_stream().await {
        Ok(stream) => stream,
        Err(err) => {
            trace!(%err, "failed to open event stream");
            return Outcome::failed();
        }
    };

    let mut events = 0usize;
    let mut retries = 0usize;
    loop {
        match stream.next_line().await {
            // lines keep their terminator, so only a zero-length read is blank
            Ok(Some(line)) if line.is_empty() => break,
            Ok(Some(line)) => {
                retries = 0;
                if is_event(&line) {
                    events += 1;
                }
            }
            Ok(None) => break,
            Err(err) => {
                if retries >= max_retries {
                    trace!(events, %err, "abandoning event stream");
                    break;
                }
                retries += 1;
                trace!(events, retries, %err, "event stream read failed, retrying");
            }
        }
    }

    Outcome::streamed(start.elapsed(), events)
}
