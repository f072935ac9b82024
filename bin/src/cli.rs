//! Parse from either cli or env var
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use loadgen_core::{
    HttpTarget, LoadJobSpec, Method, Mode, RpcTarget,
    config::{
        DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DEFAULT_PAYLOAD_SIZE, DEFAULT_REQ_NUM,
        DEFAULT_SEED, trace,
    },
};
use tracing::warn;

/// default timeout of a unary request, in seconds
pub const DEFAULT_UNARY_TIMEOUT: u64 = 5;
/// default timeout of streaming requests, in seconds
pub const DEFAULT_STREAM_TIMEOUT: u64 = 10;
/// default HTTP method of unary requests
pub static DEFAULT_HTTP_METHOD: &str = "POST";

#[derive(Parser, Debug, Clone)]
#[clap(author, name = "loadgen", bin_name = "loadgen", about, long_about = None)]
/// concurrent HTTP/gRPC load generator. Loads `.env` from the working dir as well
pub struct Cli {
    /// log filter, any RUST_LOG directive
    #[clap(long, env = "LOADGEN_LOG", default_value = trace::DEFAULT_LOADGEN_LOG)]
    pub loadgen_log: String,
    /// "standard", "json" or "pretty"
    #[clap(long, env = "LOADGEN_LOG_FORMAT", default_value = trace::DEFAULT_LOG_FORMAT)]
    pub log_format: String,
    /// print the report as JSON
    #[clap(long, env = "LOADGEN_JSON")]
    pub json: bool,
    /// seed for generated request fields
    #[clap(long, env = "LOADGEN_SEED", default_value_t = DEFAULT_SEED)]
    pub seed: u64,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// load an HTTP endpoint
    Http {
        #[clap(subcommand)]
        mode: HttpCommand,
    },
    /// load a gRPC method described by a .proto file
    Grpc(GrpcArgs),
}

#[derive(Subcommand, Debug, Clone)]
pub enum HttpCommand {
    /// one request per trial
    Unary(UnaryArgs),
    /// read a server-sent event stream per trial
    Sse(LoadArgs),
    /// upload a generated file per trial
    Cs(UploadArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    #[clap(long, env = "LOADGEN_DESTINATION")]
    pub destination: String,
    /// number of trials
    #[clap(long, env = "LOADGEN_REQN", default_value_t = DEFAULT_REQ_NUM)]
    pub reqn: usize,
    /// max trials in flight
    #[clap(long, env = "LOADGEN_CONC", default_value_t = DEFAULT_CONCURRENCY)]
    pub conc: usize,
    /// per-request timeout in seconds, 0 disables it
    #[clap(long, env = "LOADGEN_TIMEOUT")]
    pub timeout: Option<u64>,
    #[clap(long, env = "LOADGEN_MAXR", default_value_t = DEFAULT_MAX_RETRIES)]
    pub maxr: usize,
}

#[derive(Args, Debug, Clone)]
pub struct UnaryArgs {
    #[clap(flatten)]
    pub load: LoadArgs,
    /// request body, sent for POST and PUT
    #[clap(long, env = "LOADGEN_REQB_PATH")]
    pub reqb_path: Option<PathBuf>,
    #[clap(long, env = "LOADGEN_METHOD", default_value = DEFAULT_HTTP_METHOD)]
    pub method: String,
}

#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
    #[clap(flatten)]
    pub load: LoadArgs,
    /// size in bytes of the uploaded file
    #[clap(long, env = "LOADGEN_SIZE", default_value_t = DEFAULT_PAYLOAD_SIZE)]
    pub size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct GrpcArgs {
    #[clap(flatten)]
    pub upload: UploadArgs,
    #[clap(long, env = "LOADGEN_PROTO")]
    pub proto: PathBuf,
    /// extra directories searched for imports
    #[clap(long = "import-path", env = "LOADGEN_IMPORT_PATH", value_delimiter = ',')]
    pub import_paths: Vec<PathBuf>,
    /// rpc name, matched case-insensitively
    #[clap(long, env = "LOADGEN_METHOD")]
    pub method: String,
}

/// a validated run, ready to execute
#[derive(Debug)]
pub enum Plan {
    Http { target: HttpTarget, job: LoadJobSpec },
    Grpc { target: RpcTarget, job: LoadJobSpec },
}

impl Plan {
    pub fn job(&self) -> &LoadJobSpec {
        match self {
            Self::Http { job, .. } | Self::Grpc { job, .. } => job,
        }
    }
}

impl LoadArgs {
    fn job(&self, mode: Mode, seed: u64, default_timeout: u64) -> Result<LoadJobSpec> {
        if self.conc == 0 {
            bail!("--conc must be greater than 0");
        }
        Ok(LoadJobSpec {
            req_num: self.reqn,
            concurrency: self.conc,
            timeout_secs: self.timeout.unwrap_or(default_timeout),
            max_retries: self.maxr,
            mode,
            payload_size_bytes: 0,
            seed,
        })
    }
}

fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid http method `{method}`"))
}

/// only POST and PUT carry a body; an unreadable file sends none
fn load_body(method: &Method, path: Option<&PathBuf>) -> Bytes {
    let Some(path) = path else {
        return Bytes::new();
    };
    if *method != Method::POST && *method != Method::PUT {
        return Bytes::new();
    }
    match std::fs::read(path) {
        Ok(body) => Bytes::from(body),
        Err(err) => {
            warn!(?path, %err, "request body not loaded, sending an empty body");
            Bytes::new()
        }
    }
}

impl TryFrom<Cli> for Plan {
    type Error = anyhow::Error;

    fn try_from(args: Cli) -> Result<Self> {
        let seed = args.seed;
        match args.command {
            Command::Http { mode } => http_plan(mode, seed),
            Command::Grpc(grpc) => grpc_plan(grpc, seed),
        }
    }
}

fn http_plan(mode: HttpCommand, seed: u64) -> Result<Plan> {
    let (load, job, method, body) = match mode {
        HttpCommand::Unary(unary) => {
            let method = parse_method(&unary.method)?;
            let body = load_body(&method, unary.reqb_path.as_ref());
            let job = unary.load.job(Mode::Unary, seed, DEFAULT_UNARY_TIMEOUT)?;
            (unary.load, job, method, body)
        }
        HttpCommand::Sse(load) => {
            let job = load.job(Mode::EventStream, seed, DEFAULT_STREAM_TIMEOUT)?;
            (load, job, Method::GET, Bytes::new())
        }
        HttpCommand::Cs(upload) => {
            let mut job = upload
                .load
                .job(Mode::ClientStream, seed, DEFAULT_STREAM_TIMEOUT)?;
            job.payload_size_bytes = upload.size;
            (upload.load, job, Method::POST, Bytes::new())
        }
    };

    Ok(Plan::Http {
        target: HttpTarget {
            destination: load.destination,
            method,
            body,
            upload: None,
        },
        job,
    })
}

fn grpc_plan(args: GrpcArgs, seed: u64) -> Result<Plan> {
    let method = proto_schema::load_method(&args.proto, &args.import_paths, &args.method)
        .with_context(|| format!("failed to load method `{}` from {:?}", args.method, args.proto))?;
    let mode = Mode::from_streaming_flags(method.client_streaming, method.server_streaming)
        .ok_or_else(|| anyhow!("bidirectional streaming method `{}` is not supported", method.name))?;

    let mut job = args.upload.load.job(mode, seed, DEFAULT_STREAM_TIMEOUT)?;
    if mode == Mode::ClientStream {
        job.payload_size_bytes = args.upload.size;
    }

    Ok(Plan::Grpc {
        target: RpcTarget {
            destination: args.upload.load.destination,
            method,
            upload: None,
        },
        job,
    })
}
