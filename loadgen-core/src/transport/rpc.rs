use std::time::Duration;

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{
    Request, Streaming,
    client::Grpc,
    codec::ProstCodec,
    codegen::http::uri::PathAndQuery,
    transport::{Channel, Endpoint},
};
use tracing::debug;

use crate::descriptor::MethodDescriptor;
use crate::message::{DynamicMessage, RawMessage};
use crate::transport::{ClientStream, NoStream, ServerStream, Transport, TransportError};

/// messages buffered between a trial and its outbound call stream
const STREAM_BUFFER: usize = 8;

type Codec = ProstCodec<DynamicMessage, RawMessage>;

/// gRPC transport over one shared `Channel`. Calls go through tonic's generic
/// client, so any method can be driven from a runtime descriptor.
#[derive(Debug, Clone)]
pub struct RpcTransport {
    channel: Channel,
    path: PathAndQuery,
}

impl RpcTransport {
    /// connect eagerly, an unreachable destination fails the run here
    pub async fn connect(
        destination: &str,
        method: &MethodDescriptor,
        connect_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let uri = if destination.contains("://") {
            destination.to_string()
        } else {
            format!("http://{destination}")
        };
        let path = PathAndQuery::try_from(method.full_path())
            .map_err(|err| TransportError::InvalidTarget(format!("{}: {err}", method.full_path())))?;

        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|err| TransportError::InvalidTarget(format!("{uri}: {err}")))?;
        if let Some(timeout) = connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }
        let channel = endpoint
            .connect()
            .await
            .map_err(|err| TransportError::Connect(format!("{uri}: {err}")))?;
        debug!(%uri, %path, "connected grpc channel");

        Ok(Self { channel, path })
    }

    pub fn path(&self) -> &PathAndQuery {
        &self.path
    }

    async fn client(&self) -> Result<Grpc<Channel>, TransportError> {
        let mut grpc = Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        Ok(grpc)
    }
}

#[async_trait]
impl Transport for RpcTransport {
    type Payload = DynamicMessage;
    type Reply = RawMessage;
    type ClientStream = RpcClientStream;
    type ServerStream = RpcServerStream;
    type EventStream = NoStream<DynamicMessage, RawMessage>;

    async fn unary_call(&self, payload: DynamicMessage) -> Result<RawMessage, TransportError> {
        let mut grpc = self.client().await?;
        let resp = grpc
            .unary(Request::new(payload), self.path.clone(), Codec::default())
            .await?;
        Ok(resp.into_inner())
    }

    async fn open_client_stream(&self) -> Result<RpcClientStream, TransportError> {
        let mut grpc = self.client().await?;
        let path = self.path.clone();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        let call = tokio::spawn(async move {
            let resp = grpc
                .client_streaming(Request::new(ReceiverStream::new(rx)), path, Codec::default())
                .await?;
            Ok::<_, TransportError>(resp.into_inner())
        });

        Ok(RpcClientStream {
            tx: Some(tx),
            call: Some(call),
        })
    }

    async fn open_server_stream(
        &self,
        timeout: Option<Duration>,
    ) -> Result<RpcServerStream, TransportError> {
        let mut grpc = self.client().await?;
        let path = self.path.clone();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        let mut request = Request::new(ReceiverStream::new(rx));
        if let Some(timeout) = timeout {
            request.set_timeout(timeout);
        }
        // the generic streaming call lets send, close and receive happen as
        // separate steps; the server still sees a single request message
        let call = tokio::spawn(async move {
            let resp = grpc.streaming(request, path, Codec::default()).await?;
            Ok::<_, TransportError>(resp.into_inner())
        });

        Ok(RpcServerStream {
            tx: Some(tx),
            call: Some(call),
            inbound: None,
        })
    }

    async fn open_event_stream(
        &self,
    ) -> Result<NoStream<DynamicMessage, RawMessage>, TransportError> {
        Err(TransportError::Unsupported("event stream over grpc"))
    }
}

#[derive(Debug)]
pub struct RpcClientStream {
    tx: Option<mpsc::Sender<DynamicMessage>>,
    call: Option<JoinHandle<Result<RawMessage, TransportError>>>,
}

#[async_trait]
impl ClientStream for RpcClientStream {
    type Payload = DynamicMessage;
    type Reply = RawMessage;

    async fn send(&mut self, payload: DynamicMessage) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::StreamClosed)?;
        // the receiver is gone once the call has failed
        tx.send(payload)
            .await
            .map_err(|_| TransportError::StreamClosed)
    }

    async fn close_send(&mut self) -> Result<(), TransportError> {
        self.tx.take();
        Ok(())
    }

    async fn recv(&mut self) -> Result<RawMessage, TransportError> {
        let call = self.call.take().ok_or(TransportError::StreamClosed)?;
        call.await?
    }
}

impl Drop for RpcClientStream {
    fn drop(&mut self) {
        if let Some(call) = self.call.take() {
            call.abort();
        }
    }
}

pub struct RpcServerStream {
    tx: Option<mpsc::Sender<DynamicMessage>>,
    call: Option<JoinHandle<Result<Streaming<RawMessage>, TransportError>>>,
    inbound: Option<Streaming<RawMessage>>,
}

impl std::fmt::Debug for RpcServerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServerStream")
            .field("send_open", &self.tx.is_some())
            .field("receiving", &self.inbound.is_some())
            .finish()
    }
}

#[async_trait]
impl ServerStream for RpcServerStream {
    type Payload = DynamicMessage;
    type Reply = RawMessage;

    async fn send(&mut self, payload: DynamicMessage) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::StreamClosed)?;
        tx.send(payload)
            .await
            .map_err(|_| TransportError::StreamClosed)
    }

    async fn close_send(&mut self) -> Result<(), TransportError> {
        self.tx.take();
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<RawMessage>, TransportError> {
        if self.inbound.is_none() {
            let call = self.call.take().ok_or(TransportError::StreamClosed)?;
            self.inbound = Some(call.await??);
        }
        let inbound = self.inbound.as_mut().ok_or(TransportError::StreamClosed)?;
        Ok(inbound.message().await?)
    }
}

impl Drop for RpcServerStream {
    fn drop(&mut self) {
        if let Some(call) = self.call.take() {
            call.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RpcTransport;
    use crate::descriptor::{MessageShape, MethodDescriptor};
    use crate::transport::TransportError;

    fn method() -> MethodDescriptor {
        MethodDescriptor {
            package: "chat".to_string(),
            service: "ChatService".to_string(),
            name: "SendMessage".to_string(),
            input: MessageShape::default(),
            output: MessageShape::default(),
            client_streaming: false,
            server_streaming: false,
        }
    }

    #[tokio::test]
    async fn unreachable_destination_fails_to_connect() {
        // bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let err = RpcTransport::connect(
            &addr.to_string(),
            &method(),
            Some(Duration::from_millis(500)),
        )
        .await
        .expect_err("nothing is listening");
        assert!(matches!(err, TransportError::Connect(_)));
    }

    #[tokio::test]
    async fn rejects_invalid_destination() {
        let err = RpcTransport::connect("http://exa mple:50051", &method(), None)
            .await
            .expect_err("invalid uri");
        assert!(matches!(err, TransportError::InvalidTarget(_)));
    }

    #[test]
    fn deadline_status_maps_to_deadline_error() {
        let err = TransportError::from(tonic::Status::deadline_exceeded("slow"));
        assert!(err.is_deadline());
        let err = TransportError::from(tonic::Status::unavailable("down"));
        assert!(matches!(err, TransportError::Rpc(_)));
    }
}
