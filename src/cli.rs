//! Process entrypoint surface (C9): flag parsing for the single `start`
//! subcommand, mirroring `original_source/cmd/root.go` and
//! `original_source/cmd/start.go`'s flag/env-var shape.

use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "wasm-stream-broker", about = "Hot-reloadable Wasm stream-processing broker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the broker: subscribe/listen per binding, run bindings
    /// through their Wasm modules, and republish the results.
    Start(StartArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct StartArgs {
    /// NATS server URL(s) used for subscribing, comma separated.
    #[arg(short = 'n', long, env = "NATS_SUB_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_sub_url: String,

    /// NATS server URL(s) used for publishing, comma separated.
    #[arg(short = 'N', long, env = "NATS_PUB_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_pub_url: String,

    /// NATS credentials file (combined JWT and NKey) for the subscriber side.
    #[arg(short = 'c', long, env = "NATS_SUB_CREDS")]
    pub nats_sub_creds: Option<String>,

    /// NATS credentials file (combined JWT and NKey) for the publisher side.
    #[arg(short = 'C', long, env = "NATS_PUB_CREDS")]
    pub nats_pub_creds: Option<String>,

    /// NATS JWT for the subscriber side.
    #[arg(short = 'w', long, env = "NATS_SUB_JWT")]
    pub nats_sub_jwt: Option<String>,

    /// NATS JWT for the publisher side.
    #[arg(short = 'W', long, env = "NATS_PUB_JWT")]
    pub nats_pub_jwt: Option<String>,

    /// NATS NKey for the subscriber side.
    #[arg(short = 'k', long, env = "NATS_SUB_NKEY")]
    pub nats_sub_nkey: Option<String>,

    /// NATS NKey for the publisher side.
    #[arg(short = 'K', long, env = "NATS_PUB_NKEY")]
    pub nats_pub_nkey: Option<String>,

    /// TLS client certificate for the NATS connection.
    #[arg(long, env = "TLS_CLIENT_CERT")]
    pub client_cert: Option<String>,

    /// TLS private key for the NATS connection.
    #[arg(long, env = "TLS_CLIENT_KEY")]
    pub client_key: Option<String>,

    /// CA certificate for the NATS connection.
    #[arg(long, env = "CA_CERT")]
    pub ca_cert: Option<String>,

    /// Subject prefix used when publishing, as in `{prefix}.solana`.
    #[arg(long, env = "PUBLISHER_PREFIX", default_value = "")]
    pub prefix: String,

    /// Publisher name, as in `{prefix}.{name}.>`.
    #[arg(long, env = "PUBLISHER_NAME", default_value = "wasm-stream-broker")]
    pub name: String,

    /// Path or URL to the bindings configuration document.
    #[arg(long, env = "CONFIG", default_value = "config.json")]
    pub config: String,

    /// Config reload interval, in seconds.
    #[arg(long, env = "RELOAD_INTERVAL_SECS", default_value_t = 60)]
    pub reload_interval_secs: u64,
}

impl StartArgs {
    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }
}
