//! load job configuration

use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_REQ_NUM: usize = 1;
pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_SEED: u64 = 1;
/// default size of the generated upload file, 16 MiB
pub const DEFAULT_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Wire protocol a run speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Grpc,
}

/// Interaction mode of every trial in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Unary,
    ClientStream,
    ServerStream,
    EventStream,
}

impl Mode {
    pub const fn is_streaming(self) -> bool {
        matches!(self, Self::ServerStream | Self::EventStream)
    }

    pub const fn supported_by(self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Http => matches!(self, Self::Unary | Self::ClientStream | Self::EventStream),
            Protocol::Grpc => matches!(self, Self::Unary | Self::ClientStream | Self::ServerStream),
        }
    }

    /// mode implied by a gRPC method's streaming flags, `None` for bidi methods
    pub const fn from_streaming_flags(client_streaming: bool, server_streaming: bool) -> Option<Self> {
        match (client_streaming, server_streaming) {
            (false, false) => Some(Self::Unary),
            (true, false) => Some(Self::ClientStream),
            (false, true) => Some(Self::ServerStream),
            (true, true) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadJobSpec {
    pub req_num: usize,
    pub concurrency: usize,
    /// `0` disables the per-request timeout
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub mode: Mode,
    pub payload_size_bytes: usize,
    pub seed: u64,
}

impl LoadJobSpec {
    pub fn new(mode: Mode) -> Self {
        Self {
            req_num: DEFAULT_REQ_NUM,
            concurrency: DEFAULT_CONCURRENCY,
            timeout_secs: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            mode,
            payload_size_bytes: 0,
            seed: DEFAULT_SEED,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn validate(&self, protocol: Protocol) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be greater than 0");
        }
        if !self.mode.supported_by(protocol) {
            bail!("{:?} mode is not supported over {:?}", self.mode, protocol);
        }
        Ok(())
    }
}

pub mod trace {
    //! tracing subscriber setup
    use std::str::FromStr;

    use anyhow::{Result, bail};
    use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    pub static DEFAULT_LOG_FORMAT: &str = "standard";
    pub static DEFAULT_LOADGEN_LOG: &str = "info";

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum LogFormat {
        /// unstructured single line
        #[default]
        Standard,
        Json,
        Pretty,
    }

    impl FromStr for LogFormat {
        type Err = anyhow::Error;

        fn from_str(s: &str) -> Result<Self> {
            Ok(match s.to_ascii_lowercase().as_str() {
                "standard" => Self::Standard,
                "json" => Self::Json,
                "pretty" => Self::Pretty,
                other => bail!("unknown log format `{other}`, expected standard, json or pretty"),
            })
        }
    }

    /// `directives` takes RUST_LOG syntax. Client connection internals are
    /// silenced, they log per request.
    pub fn filter(directives: &str) -> Result<EnvFilter> {
        Ok(EnvFilter::try_new(directives)?
            .add_directive("hyper=off".parse()?)
            .add_directive("h2=off".parse()?))
    }

    /// install the global subscriber
    pub fn init(directives: &str, format: LogFormat) -> Result<()> {
        let registry = tracing_subscriber::registry().with(filter(directives)?);
        match format {
            LogFormat::Standard => registry.with(fmt::layer()).try_init()?,
            LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
            LogFormat::Pretty => registry
                .with(fmt::layer().pretty().with_file(false).with_line_number(false))
                .try_init()?,
        }
        Ok(())
    }
}
