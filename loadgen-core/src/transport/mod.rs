//! Transports own the single shared client of a run. Every method takes
//! `&self` and may be called from many trials at once.
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod http;
pub mod rpc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("rpc error: {0}")]
    Rpc(Box<tonic::Status>),
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("stream closed")]
    StreamClosed,
    #[error("call task failed: {0}")]
    Task(String),
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
}

impl TransportError {
    pub fn is_deadline(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }
}

impl From<tonic::Status> for TransportError {
    fn from(status: tonic::Status) -> Self {
        if status.code() == tonic::Code::DeadlineExceeded {
            Self::DeadlineExceeded
        } else {
            Self::Rpc(Box::new(status))
        }
    }
}

impl From<tokio::task::JoinError> for TransportError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Payload: Send + 'static;
    type Reply: Send + 'static;
    type ClientStream: ClientStream<Payload = Self::Payload, Reply = Self::Reply>;
    type ServerStream: ServerStream<Payload = Self::Payload, Reply = Self::Reply>;
    type EventStream: EventStream;

    async fn unary_call(&self, payload: Self::Payload) -> Result<Self::Reply, TransportError>;

    async fn open_client_stream(&self) -> Result<Self::ClientStream, TransportError>;

    /// `timeout` bounds the whole call; `None` waits indefinitely
    async fn open_server_stream(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Self::ServerStream, TransportError>;

    async fn open_event_stream(&self) -> Result<Self::EventStream, TransportError>;
}

/// many messages up, one reply down
#[async_trait]
pub trait ClientStream: Send {
    type Payload: Send;
    type Reply: Send;

    async fn send(&mut self, payload: Self::Payload) -> Result<(), TransportError>;

    async fn close_send(&mut self) -> Result<(), TransportError>;

    /// the single final reply, valid once after `close_send`
    async fn recv(&mut self) -> Result<Self::Reply, TransportError>;
}

/// one message up, many replies down
#[async_trait]
pub trait ServerStream: Send {
    type Payload: Send;
    type Reply: Send;

    async fn send(&mut self, payload: Self::Payload) -> Result<(), TransportError>;

    async fn close_send(&mut self) -> Result<(), TransportError>;

    /// next reply, `Ok(None)` on clean end of stream
    async fn recv(&mut self) -> Result<Option<Self::Reply>, TransportError>;
}

/// line oriented text stream
#[async_trait]
pub trait EventStream: Send {
    /// next line including its terminator, `Ok(None)` on clean end of stream
    async fn next_line(&mut self) -> Result<Option<String>, TransportError>;
}

/// Handle type for a stream kind a transport can't open
#[derive(Debug)]
pub enum NoStream<P, R> {
    #[doc(hidden)]
    _Never(std::convert::Infallible, std::marker::PhantomData<fn() -> (P, R)>),
}

#[async_trait]
impl<P: Send + 'static, R: Send + 'static> ServerStream for NoStream<P, R> {
    type Payload = P;
    type Reply = R;

    async fn send(&mut self, _payload: P) -> Result<(), TransportError> {
        match *self {
            Self::_Never(never, _) => match never {},
        }
    }

    async fn close_send(&mut self) -> Result<(), TransportError> {
        match *self {
            Self::_Never(never, _) => match never {},
        }
    }

    async fn recv(&mut self) -> Result<Option<R>, TransportError> {
        match *self {
            Self::_Never(never, _) => match never {},
        }
    }
}

#[async_trait]
impl<P: Send + 'static, R: Send + 'static> EventStream for NoStream<P, R> {
    async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        match *self {
            Self::_Never(never, _) => match never {},
        }
    }
}
