use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::{Client, Method, Response, Url, header::CONTENT_TYPE};
use tokio::{io::AsyncBufReadExt, sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::transport::{ClientStream, EventStream, NoStream, Transport, TransportError};

/// chunks buffered between an upload trial and its request body
const UPLOAD_BUFFER: usize = 8;

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    destination: Url,
    method: Method,
    timeout: Option<Duration>,
}

impl HttpTransport {
    /// Build the run's shared client. No request is made here, so an
    /// unreachable destination only shows up as failed trials.
    pub fn new(
        destination: &str,
        method: Method,
        timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let destination = Url::parse(destination)
            .map_err(|err| TransportError::InvalidTarget(format!("{destination}: {err}")))?;
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        debug!(%destination, %method, ?timeout, "built http client");

        Ok(Self {
            client,
            destination,
            method,
            timeout,
        })
    }

    fn timed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.timeout {
            Some(timeout) => req.timeout(timeout),
            None => req,
        }
    }
}

fn check_status(resp: Response) -> Result<Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(TransportError::Status(status.as_u16()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    type Payload = Bytes;
    type Reply = Bytes;
    type ClientStream = HttpUpload;
    type ServerStream = NoStream<Bytes, Bytes>;
    type EventStream = HttpEventStream;

    async fn unary_call(&self, payload: Bytes) -> Result<Bytes, TransportError> {
        let mut req = self
            .client
            .request(self.method.clone(), self.destination.clone());
        if !payload.is_empty() {
            req = req.header(CONTENT_TYPE, "application/json").body(payload);
        }
        let resp = check_status(self.timed(req).send().await?)?;
        Ok(resp.bytes().await?)
    }

    async fn open_client_stream(&self) -> Result<HttpUpload, TransportError> {
        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(UPLOAD_BUFFER);
        let req = self
            .client
            .post(self.destination.clone())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(ReceiverStream::new(rx)));
        let req = self.timed(req);

        let call = tokio::spawn(async move {
            let resp = check_status(req.send().await?)?;
            Ok::<_, TransportError>(resp.bytes().await?)
        });

        Ok(HttpUpload {
            tx: Some(tx),
            call: Some(call),
        })
    }

    async fn open_server_stream(
        &self,
        _timeout: Option<Duration>,
    ) -> Result<NoStream<Bytes, Bytes>, TransportError> {
        Err(TransportError::Unsupported("server stream over http"))
    }

    async fn open_event_stream(&self) -> Result<HttpEventStream, TransportError> {
        // the timeout covers the body too, so an endless stream ends in a read error
        let req = self.timed(self.client.get(self.destination.clone()));
        let resp = check_status(req.send().await?)?;

        let body = resp.bytes_stream().map_err(std::io::Error::other);
        Ok(HttpEventStream {
            reader: Box::pin(StreamReader::new(body)),
        })
    }
}

/// Streaming request body. Chunks go through a channel into the body of a
/// request that was started when the stream was opened.
#[derive(Debug)]
pub struct HttpUpload {
    tx: Option<mpsc::Sender<Result<Bytes, std::io::Error>>>,
    call: Option<JoinHandle<Result<Bytes, TransportError>>>,
}

#[async_trait]
impl ClientStream for HttpUpload {
    type Payload = Bytes;
    type Reply = Bytes;

    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::StreamClosed)?;
        tx.send(Ok(payload))
            .await
            .map_err(|_| TransportError::StreamClosed)
    }

    async fn close_send(&mut self) -> Result<(), TransportError> {
        // dropping the sender ends the request body
        self.tx.take();
        Ok(())
    }

    async fn recv(&mut self) -> Result<Bytes, TransportError> {
        let call = self.call.take().ok_or(TransportError::StreamClosed)?;
        call.await?
    }
}

impl Drop for HttpUpload {
    fn drop(&mut self) {
        if let Some(call) = self.call.take() {
            call.abort();
        }
    }
}

type BodyReader = std::pin::Pin<Box<dyn tokio::io::AsyncBufRead + Send>>;

pub struct HttpEventStream {
    reader: BodyReader,
}

impl std::fmt::Debug for HttpEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEventStream").finish_non_exhaustive()
    }
}

#[async_trait]
impl EventStream for HttpEventStream {
    async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        let mut line = Vec::new();
        let read = self.reader.read_until(b'\n', &mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}
