pub mod artifact;
pub mod cli;
pub mod config;
pub mod error;
pub mod harness;
pub mod module_cache;
pub mod nats_connect;
pub mod publisher;
pub mod reconciler;
pub mod socket_ingress;
pub mod supervisor;
pub mod transport;
pub mod worker;

use std::sync::Arc;

use crate::cli::StartArgs;
use crate::nats_connect::Side;
use crate::supervisor::Supervisor;
use crate::transport::{NatsTransport, Transport};

/// Runs the `start` subcommand to completion: connects to NATS, starts the
/// supervisor, blocks until a shutdown signal arrives, then winds down.
pub async fn run_start(args: StartArgs) -> anyhow::Result<()> {
    let sub_client = nats_connect::connect(Side {
        urls: &args.nats_sub_url,
        creds_file: args.nats_sub_creds.as_deref(),
        nkey: args.nats_sub_nkey.as_deref(),
        client_name: &format!("{} (sub)", args.name),
    })
    .await?;

    let pub_client = nats_connect::connect(Side {
        urls: &args.nats_pub_url,
        creds_file: args.nats_pub_creds.as_deref(),
        nkey: args.nats_pub_nkey.as_deref(),
        client_name: &format!("{} (pub)", args.name),
    })
    .await?;

    let transport: Arc<dyn Transport> = Arc::new(
        NatsTransport::new(sub_client, pub_client).with_publish_prefix(args.prefix.clone()),
    );

    let supervisor = Supervisor::start(args.config.clone(), args.reload_interval(), transport);

    supervisor.wait_for_shutdown_signal().await;
    supervisor.close().await
}
