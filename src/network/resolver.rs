use std::collections::HashSet;
use std::net::SocketAddr;

use futures::future::join_all;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

use crate::core::{Error, Result, ServerId};

/// Turns configured server names into socket addresses.
///
/// Address literals never touch DNS; the system resolver is only built the
/// first time a host name needs looking up.
#[derive(Default)]
pub struct ServerResolver {
    dns: OnceCell<TokioAsyncResolver>,
}

impl ServerResolver {
    /// Creates a resolver
    pub fn new() -> Self {
        ServerResolver::default()
    }

    async fn dns(&self) -> Result<&TokioAsyncResolver> {
        self.dns
            .get_or_try_init(|| async {
                TokioAsyncResolver::tokio_from_system_conf()
                    .or_else(|e| {
                        debug!(error = %e, "system resolver configuration unavailable, using defaults");
                        TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
                    })
                    .map_err(|e| Error::network(format!("Failed to create resolver: {}", e)))
            })
            .await
    }

    /// Resolves one server to all of its addresses
    pub async fn resolve(&self, server: &ServerId) -> Result<Vec<SocketAddr>> {
        if let Some(addr) = server.literal_addr() {
            return Ok(vec![addr]);
        }

        let lookup = self
            .dns()
            .await?
            .lookup_ip(server.host())
            .await
            .map_err(|e| Error::transport(format!("resolving {}: {}", server, e)))?;

        let addrs: Vec<SocketAddr> = lookup
            .iter()
            .map(|ip| SocketAddr::new(ip, server.port()))
            .collect();

        if addrs.is_empty() {
            return Err(Error::transport(format!("{} has no addresses", server)));
        }
        Ok(addrs)
    }

    /// Resolves every server concurrently, expanding each name into one entry
    /// per distinct address. Servers that fail to resolve are logged and
    /// skipped; an address already claimed by an earlier server is dropped.
    pub async fn resolve_all(&self, servers: &[ServerId]) -> Vec<(ServerId, SocketAddr)> {
        let results = join_all(servers.iter().map(|server| self.resolve(server))).await;

        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for (server, result) in servers.iter().zip(results) {
            match result {
                Ok(addrs) => {
                    for addr in addrs {
                        if seen.insert(addr) {
                            resolved.push((server.clone(), addr));
                        }
                    }
                }
                Err(e) => warn!(%server, error = %e, "server skipped"),
            }
        }
        resolved
    }
}
