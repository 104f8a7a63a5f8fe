//! Builds `async_nats::Client` connections from the subscriber/publisher
//! side flags in [`crate::cli::StartArgs`]. Credential/TLS plumbing is an
//! external collaborator per SPEC_FULL.md §1 ("out of scope"); this module
//! wires the handful of options `async-nats` exposes directly and leaves
//! anything fancier (vault-issued creds, custom TLS trust stores) to the
//! operator's environment.

use async_nats::ConnectOptions;

pub struct Side<'a> {
    pub urls: &'a str,
    pub creds_file: Option<&'a str>,
    pub nkey: Option<&'a str>,
    pub client_name: &'a str,
}

pub async fn connect(side: Side<'_>) -> anyhow::Result<async_nats::Client> {
    let mut options = ConnectOptions::new().name(side.client_name);

    if let Some(creds_file) = side.creds_file {
        options = options.credentials_file(creds_file).await?;
    } else if let Some(nkey) = side.nkey {
        options = options.nkey(nkey.to_owned());
    }

    let client = options.connect(normalize_urls(side.urls)).await?;
    Ok(client)
}

/// Trims whitespace around each comma-separated URL so operators can write
/// `"nats://a:4222, nats://b:4222"` without `async-nats` choking on the
/// leading space.
fn normalize_urls(urls: &str) -> String {
    urls.split(',').map(str::trim).collect::<Vec<_>>().join(",")
}
