use clap::{Args, Parser, ValueEnum};

/// Address of the dice service. Fixed for every deployment.
pub const DEFAULT_UPSTREAM_URL: &str = "http://dice:8080/rolldice";

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub upstream: UpstreamConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Args)]
pub struct ServerConfig {
    /// Host to listen on
    #[arg(long, env = "DICE_PROXY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "DICE_PROXY_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Hard cap on the total time spent serving a single request
    #[arg(long, env = "DICE_PROXY_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// How long to wait for in-flight requests to drain on shutdown
    #[arg(long, env = "DICE_PROXY_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct UpstreamConfig {
    /// Not exposed on the command line; only overridden in tests.
    #[arg(skip = String::from(DEFAULT_UPSTREAM_URL))]
    pub url: String,

    /// Total time allowed for the upstream call, including reading the body
    #[arg(long = "upstream-timeout-ms", env = "DICE_PROXY_UPSTREAM_TIMEOUT_MS", default_value_t = 10_000)]
    pub timeout_ms: u64,

    /// Time allowed to establish the upstream TCP connection
    #[arg(
        long = "upstream-connect-timeout-ms",
        env = "DICE_PROXY_UPSTREAM_CONNECT_TIMEOUT_MS",
        default_value_t = 2_000
    )]
    pub connect_timeout_ms: u64,
}

#[derive(Clone, Debug, Args)]
pub struct TelemetryConfig {
    /// OTLP/HTTP collector base URL. Export is disabled when unset.
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Value reported as `deployment.environment.name`
    #[arg(long, env = "DICE_PROXY_ENVIRONMENT", default_value = "production")]
    pub deployment_environment: String,

    /// Log output format
    #[arg(long, env = "DICE_PROXY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                request_timeout_secs: 30,
                shutdown_timeout_secs: 5,
            },
            upstream: UpstreamConfig {
                url: DEFAULT_UPSTREAM_URL.to_string(),
                timeout_ms: 10_000,
                connect_timeout_ms: 2_000,
            },
            telemetry: TelemetryConfig {
                otlp_endpoint: None,
                deployment_environment: "production".to_string(),
                log_format: LogFormat::Text,
            },
        }
    }
}
