use std::net::IpAddr;

use anyhow::anyhow;
use tracing::{debug, warn};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Fallback client port when no SRV record exists, per RFC 6120 §3.2.2.
const XMPP_CLIENT_PORT: u16 = 5222;

/// One SRV target resolved down to its addresses, in connection order.
#[derive(Debug, Clone)]
pub struct Address {
    pub ips: Vec<IpAddr>,
    pub port: u16,
}

/// RFC 6120 SRV resolution for `xmpp-client`: look up
/// `_xmpp-client._tcp.{host}`, order the records by priority ascending then
/// weight descending (RFC 2782), and resolve each target to its IP list.
/// Lookup failures are collected rather than fatal; when nothing resolves at
/// all the caller is left with the errors and an empty address list. A host
/// without SRV records falls back to `host:5222`.
pub async fn resolve(host: &str) -> (Vec<Address>, Vec<anyhow::Error>) {
    let mut errors = Vec::new();

    let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => resolver,
        Err(err) => {
            warn!(error = %err, "could not load system DNS config, using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        }
    };

    let srv_name = format!("_xmpp-client._tcp.{host}");
    let mut addresses = Vec::new();

    match resolver.srv_lookup(srv_name.clone()).await {
        Ok(lookup) => {
            let mut records: Vec<_> = lookup.iter().collect();
            records.sort_by(|a, b| {
                a.priority()
                    .cmp(&b.priority())
                    .then(b.weight().cmp(&a.weight()))
            });

            for record in records {
                let target = record.target().to_string();
                let target = target.trim_end_matches('.');
                debug!(
                    target,
                    port = record.port(),
                    priority = record.priority(),
                    "SRV record"
                );

                match resolver.lookup_ip(target).await {
                    Ok(lookup) => addresses.push(Address {
                        ips: lookup.iter().collect(),
                        port: record.port(),
                    }),
                    Err(err) => errors.push(anyhow!(err).context(format!(
                        "could not resolve SRV target {target}"
                    ))),
                }
            }
        }
        Err(err) => {
            debug!(srv = %srv_name, error = %err, "SRV lookup failed");
            errors.push(anyhow!(err).context(format!("SRV lookup for {srv_name} failed")));
        }
    }

    if addresses.is_empty() {
        match resolver.lookup_ip(host).await {
            Ok(lookup) => addresses.push(Address {
                ips: lookup.iter().collect(),
                port: XMPP_CLIENT_PORT,
            }),
            Err(err) => {
                errors.push(anyhow!(err).context(format!("could not resolve {host}")))
            }
        }
    }

    (addresses, errors)
}
