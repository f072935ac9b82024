//! Concurrent load generation against HTTP and gRPC endpoints.
//!
//! A run executes `req_num` independent trials with bounded concurrency.
//! Each trial is one interaction (unary call, client upload, server stream or
//! server-sent event stream) and yields an [`Outcome`]; outcomes are folded
//! into a [`Report`].
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use tracing::debug;

pub mod aggregator;
pub mod config;
pub mod descriptor;
pub mod dispatcher;
pub mod message;
pub mod payload;
pub mod report;
pub mod strategy;
pub mod transport;

pub use config::{LoadJobSpec, Mode, Protocol};
pub use descriptor::{FieldDescriptor, FieldKind, MessageShape, MethodDescriptor};
pub use payload::{HttpBody, MessageBuilder, UploadSource};
pub use report::Report;
pub use reqwest::Method;
pub use strategy::{Outcome, Strategy, UnaryPolicy};
pub use transport::TransportError;

use transport::{http::HttpTransport, rpc::RpcTransport};

/// where and how an HTTP run sends its requests
#[derive(Clone)]
pub struct HttpTarget {
    pub destination: String,
    pub method: Method,
    /// unary request body, reused verbatim by every trial
    pub body: Bytes,
    /// data uploaded by each client-stream trial
    pub upload: Option<Arc<dyn UploadSource>>,
}

impl std::fmt::Debug for HttpTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTarget")
            .field("destination", &self.destination)
            .field("method", &self.method)
            .field("body_len", &self.body.len())
            .field("upload", &self.upload.is_some())
            .finish()
    }
}

/// a resolved gRPC method on a destination
#[derive(Clone)]
pub struct RpcTarget {
    pub destination: String,
    pub method: MethodDescriptor,
    pub upload: Option<Arc<dyn UploadSource>>,
}

impl std::fmt::Debug for RpcTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcTarget")
            .field("destination", &self.destination)
            .field("method", &self.method.full_path())
            .field("upload", &self.upload.is_some())
            .finish()
    }
}

pub async fn run_http(target: HttpTarget, job: &LoadJobSpec) -> Result<Report> {
    job.validate(Protocol::Http)?;

    let transport = HttpTransport::new(&target.destination, target.method.clone(), job.timeout())
        .context("build http client")?;
    let strategy = Strategy::for_job(job, UnaryPolicy::retry(job.max_retries), target.upload)?;
    debug!(destination = %target.destination, ?strategy, "prepared http run");

    dispatcher::run(
        Arc::new(transport),
        Arc::new(HttpBody::new(target.body)),
        Arc::new(strategy),
        job,
        Protocol::Http,
    )
    .await
}

pub async fn run_rpc(target: RpcTarget, job: &LoadJobSpec) -> Result<Report> {
    job.validate(Protocol::Grpc)?;
    let method = &target.method;
    if Mode::from_streaming_flags(method.client_streaming, method.server_streaming)
        != Some(job.mode)
    {
        bail!(
            "{:?} mode does not match method {}",
            job.mode,
            method.full_path()
        );
    }

    let payloads = match job.mode {
        Mode::ClientStream => MessageBuilder::for_upload(method, job.seed)
            .with_context(|| format!("prepare upload for {}", method.full_path()))?,
        _ => MessageBuilder::new(method, job.seed),
    };
    let transport = RpcTransport::connect(&target.destination, method, job.timeout())
        .await
        .with_context(|| format!("connect to {}", target.destination))?;
    let strategy = Strategy::for_job(job, UnaryPolicy::Single, target.upload)?;
    debug!(path = %transport.path(), ?strategy, "prepared grpc run");

    dispatcher::run(
        Arc::new(transport),
        Arc::new(payloads),
        Arc::new(strategy),
        job,
        Protocol::Grpc,
    )
    .await
}
