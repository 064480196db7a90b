use std::time::Duration;

use tokio::task::JoinSet;

use taskgrid_common::api::{url, DiscoveryResponse};
use taskgrid_common::net;

/// Probe one host for a coordinator. True only when it answers `/discovery`
/// with a parseable body within the (tight) timeout.
pub async fn probe(client: &reqwest::Client, host: &str, port: u16, timeout: Duration) -> bool {
    let resp = match client
        .get(url::discovery(host, port))
        .timeout(timeout)
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => resp,
        _ => return false,
    };
    resp.json::<DiscoveryResponse>().await.is_ok()
}

/// Scan this machine's /24 for a coordinator; first answer wins.
/// Returns the coordinator host, or None when the whole subnet is silent.
pub async fn scan(client: &reqwest::Client, port: u16, probe_timeout: Duration) -> Option<String> {
    let prefix = net::subnet_prefix(&net::local_ipv4());
    tracing::info!(prefix = %prefix, port, "Scanning subnet for coordinator");

    let mut probes = JoinSet::new();
    for octet in 0u16..=255 {
        let host = format!("{prefix}.{octet}");
        let client = client.clone();
        probes.spawn(async move { probe(&client, &host, port, probe_timeout).await.then_some(host) });
    }

    while let Some(result) = probes.join_next().await {
        if let Ok(Some(host)) = result {
            probes.abort_all();
            tracing::info!(host = %host, port, "Coordinator found");
            return Some(host);
        }
    }
    tracing::debug!(prefix = %prefix, "No coordinator on subnet");
    None
}
