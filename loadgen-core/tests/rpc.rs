//! Drives the gRPC adapter against a local tonic server that serves a small
//! `load.Load` service through tonic's generic server handlers.
use std::{
    convert::Infallible,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use loadgen_core::{
    FieldDescriptor, FieldKind, MessageBuilder, MessageShape, MethodDescriptor, Outcome, Strategy,
    UnaryPolicy, strategy::CHUNK_SIZE, transport::rpc::RpcTransport,
};
use tokio::{net::TcpListener, sync::mpsc};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::{
    Request, Response, Status, Streaming,
    body::BoxBody,
    codec::ProstCodec,
    codegen::{Body, BoxFuture, Context, Poll, Service, StdError, http},
    server::{ClientStreamingService, Grpc, NamedService, ServerStreamingService, UnaryService},
    transport::Server,
};

#[derive(Clone, PartialEq, prost::Message)]
struct Chunk {
    #[prost(string, tag = "1")]
    name: String,
    #[prost(bytes = "vec", tag = "2")]
    data: Vec<u8>,
}

/// what the server saw, shared with the test
#[derive(Debug, Clone, Default)]
struct Seen {
    names: Arc<Mutex<Vec<String>>>,
    chunk_sizes: Arc<Mutex<Vec<usize>>>,
}

#[derive(Clone, Default)]
struct LoadServer {
    seen: Seen,
}

impl NamedService for LoadServer {
    const NAME: &'static str = "load.Load";
}

struct Echo(Seen);

impl UnaryService<Chunk> for Echo {
    type Response = Chunk;
    type Future = BoxFuture<Response<Chunk>, Status>;

    fn call(&mut self, request: Request<Chunk>) -> Self::Future {
        let seen = self.0.clone();
        Box::pin(async move {
            let chunk = request.into_inner();
            seen.names.lock().unwrap().push(chunk.name.clone());
            Ok(Response::new(chunk))
        })
    }
}

struct Collect(Seen);

impl ClientStreamingService<Chunk> for Collect {
    type Response = Chunk;
    type Future = BoxFuture<Response<Chunk>, Status>;

    fn call(&mut self, request: Request<Streaming<Chunk>>) -> Self::Future {
        let seen = self.0.clone();
        Box::pin(async move {
            let mut inbound = request.into_inner();
            let mut total = 0;
            while let Some(chunk) = inbound.message().await? {
                total += chunk.data.len();
                seen.chunk_sizes.lock().unwrap().push(chunk.data.len());
            }
            Ok(Response::new(Chunk {
                name: total.to_string(),
                data: Vec::new(),
            }))
        })
    }
}

/// replies `count` times, or until the client goes away when `None`
struct Feed {
    count: Option<usize>,
}

impl ServerStreamingService<Chunk> for Feed {
    type Response = Chunk;
    type ResponseStream = ReceiverStream<Result<Chunk, Status>>;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<Chunk>) -> Self::Future {
        let count = self.count;
        let name = request.into_inner().name;
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(4);
            tokio::spawn(async move {
                let mut sent = 0;
                while count.is_none_or(|count| sent < count) {
                    let reply = Chunk {
                        name: name.clone(),
                        data: vec![sent as u8],
                    };
                    if tx.send(Ok(reply)).await.is_err() {
                        break;
                    }
                    sent += 1;
                    if count.is_none() {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            });
            Ok(Response::new(ReceiverStream::new(rx)))
        })
    }
}

impl<B> Service<http::Request<B>> for LoadServer
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let seen = self.seen.clone();
        match req.uri().path() {
            "/load.Load/Unary" => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::default());
                Ok(grpc.unary(Echo(seen), req).await)
            }),
            "/load.Load/Upload" => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::default());
                Ok(grpc.client_streaming(Collect(seen), req).await)
            }),
            "/load.Load/Watch" => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::default());
                Ok(grpc.server_streaming(Feed { count: Some(5) }, req).await)
            }),
            "/load.Load/Follow" => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::default());
                Ok(grpc.server_streaming(Feed { count: None }, req).await)
            }),
            _ => Box::pin(async move {
                let resp = http::Response::builder()
                    .status(200)
                    .header("grpc-status", (tonic::Code::Unimplemented as i32).to_string())
                    .header(http::header::CONTENT_TYPE, "application/grpc")
                    .body(tonic::body::empty_body())
                    .unwrap();
                Ok(resp)
            }),
        }
    }
}

/// serves `load.Load` on an ephemeral port, returns its address and what it records
async fn serve() -> (String, Seen) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = LoadServer::default();
    let seen = server.seen.clone();
    tokio::spawn(
        Server::builder()
            .add_service(server)
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    (addr.to_string(), seen)
}

fn chunk_shape() -> MessageShape {
    MessageShape {
        name: "load.Chunk".to_string(),
        fields: vec![
            FieldDescriptor {
                name: "name".to_string(),
                number: 1,
                kind: FieldKind::String,
            },
            FieldDescriptor {
                name: "data".to_string(),
                number: 2,
                kind: FieldKind::Bytes,
            },
        ],
    }
}

fn method(name: &str, client_streaming: bool, server_streaming: bool) -> MethodDescriptor {
    MethodDescriptor {
        package: "load".to_string(),
        service: "Load".to_string(),
        name: name.to_string(),
        input: chunk_shape(),
        output: chunk_shape(),
        client_streaming,
        server_streaming,
    }
}

async fn trial(addr: &str, method: &MethodDescriptor, strategy: Strategy) -> Outcome {
    let transport = RpcTransport::connect(addr, method, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    let builder = if method.client_streaming {
        MessageBuilder::for_upload(method, 7).unwrap()
    } else {
        MessageBuilder::new(method, 7)
    };
    strategy.execute(&transport, &builder, 0).await
}

#[tokio::test]
async fn unary_call_succeeds() {
    let (addr, seen) = serve().await;
    let outcome = trial(
        &addr,
        &method("Unary", false, false),
        Strategy::Unary(UnaryPolicy::Single),
    )
    .await;

    assert!(outcome.successful);
    assert!(!outcome.streaming);
    let names = seen.names.lock().unwrap();
    assert_eq!(names.len(), 1);
    assert!(!names[0].is_empty());
}

#[tokio::test]
async fn unknown_method_fails_the_trial() {
    let (addr, _) = serve().await;
    let outcome = trial(
        &addr,
        &method("Missing", false, false),
        Strategy::Unary(UnaryPolicy::Single),
    )
    .await;

    assert_eq!(outcome, Outcome::failed());
}

#[tokio::test]
async fn upload_arrives_in_chunks() {
    let (addr, seen) = serve().await;
    let size = 2 * CHUNK_SIZE + 10;
    let outcome = trial(
        &addr,
        &method("Upload", true, false),
        Strategy::ClientStream {
            source: Arc::new(Bytes::from(vec![0u8; size])),
        },
    )
    .await;

    assert!(outcome.successful);
    assert_eq!(
        *seen.chunk_sizes.lock().unwrap(),
        vec![CHUNK_SIZE, CHUNK_SIZE, 10]
    );
}

#[tokio::test]
async fn server_stream_counts_replies() {
    let (addr, _) = serve().await;
    let outcome = trial(
        &addr,
        &method("Watch", false, true),
        Strategy::ServerStream {
            timeout: Some(Duration::from_secs(5)),
        },
    )
    .await;

    assert!(outcome.successful);
    assert!(outcome.streaming);
    assert_eq!(outcome.events, 5);
}

#[tokio::test]
async fn server_stream_stops_at_deadline() {
    let (addr, _) = serve().await;
    let method = method("Follow", false, true);
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        trial(
            &addr,
            &method,
            Strategy::ServerStream {
                timeout: Some(Duration::from_millis(300)),
            },
        ),
    )
    .await
    .expect("deadline ends the endless stream");

    assert!(outcome.successful);
    assert!(outcome.streaming);
    assert!(outcome.events > 0);
    assert!(outcome.latency < Duration::from_secs(2));
}
