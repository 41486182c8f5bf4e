use clap::Parser;
use transllm::Provider;

/// Streaming translation proxy between LLM API dialects.
#[derive(Debug, Parser)]
#[command(name = "transllm-proxy", version, about)]
pub struct Args {
    /// Address to bind.
    #[arg(long, env = "TRANSLLM_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind.
    #[arg(long, env = "TRANSLLM_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Log filter, e.g. `info` or `server=debug,transllm=debug`.
    #[arg(long, env = "TRANSLLM_LOG", default_value = "info")]
    pub log: String,

    /// Upstream dialect requests are translated into.
    #[arg(long, env = "TRANSLLM_SOURCE", default_value = "openai")]
    pub source: Provider,

    /// Dialect clients of this proxy speak.
    #[arg(long, env = "TRANSLLM_PROVIDER", default_value = "anthropic")]
    pub provider: Provider,

    /// Fixed upstream endpoint; defaults to the source provider's public API.
    #[arg(long, env = "TRANSLLM_UPSTREAM_URL")]
    pub upstream_url: Option<String>,

    /// API key for the upstream.
    #[arg(long, env = "TRANSLLM_UPSTREAM_API_KEY", hide_env_values = true)]
    pub upstream_api_key: Option<String>,
}
