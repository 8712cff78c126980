use std::path::PathBuf;

use clap::Parser;

/// Process entry-point flags (SPEC_FULL.md §6.B). Every flag can also be set
/// via the matching `GPROXY_*` environment variable, matching the teacher's
/// `clap` + `env` feature usage in `gproxy-core/src/bootstrap/mod.rs`.
#[derive(Parser, Debug)]
#[command(name = "gproxy", about = "Reverse proxy that balances the Anthropic Messages API across upstream providers")]
pub struct Cli {
    #[arg(long, env = "GPROXY_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    #[arg(long, env = "GPROXY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "GPROXY_PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "GPROXY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}
