use std::time::Instant;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tracing::trace;

use crate::payload::{PayloadBuilder, UploadSource};
use crate::strategy::{CHUNK_SIZE, Outcome};
use crate::transport::{ClientStream, Transport};

/// Upload the source in `CHUNK_SIZE` pieces, one message per chunk, then wait
/// for the single reply. Latency runs from stream open to reply.
pub(crate) async fn run<T, B>(transport: &T, payloads: &B, source: &dyn UploadSource) -> Outcome
where
    T: Transport,
    B: PayloadBuilder<Payload = T::Payload>,
{
    let start = Instant::now();
    let mut stream = match transport.open_client_stream().await {
        Ok(stream) => stream,
        Err(err) => {
            trace!(%err, "failed to open client stream");
            return Outcome::failed();
        }
    };
    let mut reader = match source.open().await {
        Ok(reader) => reader,
        Err(err) => {
            trace!(%err, "failed to open upload source");
            return Outcome::failed();
        }
    };

    let mut chunks = 0usize;
    loop {
        let mut buf = BytesMut::zeroed(CHUNK_SIZE);
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                trace!(chunks, %err, "upload read failed");
                return Outcome::failed();
            }
        };
        buf.truncate(n);

        if let Err(err) = stream.send(payloads.chunk(buf.freeze())).await {
            trace!(chunks, %err, "upload send failed");
            return Outcome::failed();
        }
        chunks += 1;
    }

    if let Err(err) = stream.close_send().await {
        trace!(%err, "failed to close upload");
        return Outcome::failed();
    }
    match stream.recv().await {
        Ok(_) => Outcome::success(start.elapsed()),
        Err(err) => {
            trace!(chunks, %err, "upload reply failed");
            Outcome::failed()
        }
    }
}
