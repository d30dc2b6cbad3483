//! MX + fallback host discovery (spec §4.5 "Host discovery"). Grounded in the
//! teacher's `handler::dns::DnsResolver`: a thin wrapper around
//! `hickory_resolver` with a `#[cfg(test)]`-swapped mock so discovery logic is
//! unit-testable without a real resolver.

#[cfg(not(test))]
use hickory_resolver::{Resolver, config::LookupIpStrategy, name_server::TokioConnectionProvider};

#[cfg(test)]
use mock::Resolver;

/// Default fallback hosts consulted when MX lookup fails outright (spec:
/// "additionally consult a fallback host list").
pub fn default_fallback_hosts(domain: &str) -> Vec<String> {
    vec![format!("mail.{domain}"), format!("smtp.{domain}"), domain.to_string()]
}

#[derive(Debug, thiserror::Error)]
pub enum HostDiscoveryError {
    #[error("no MX record and all fallback hosts exhausted for {0}")]
    Exhausted(String),
}

#[derive(Clone)]
pub struct HostResolver {
    #[cfg(not(test))]
    resolver: Resolver<TokioConnectionProvider>,
    #[cfg(test)]
    resolver: Resolver,
}

#[cfg(not(test))]
impl HostResolver {
    pub fn new() -> Self {
        let mut opts = hickory_resolver::config::ResolverOpts::default();
        opts.attempts = 4;
        Self {
            resolver: Resolver::builder_tokio()
                .expect("failed to read system DNS configuration")
                .with_options(opts)
                .build(),
        }
    }
}

#[cfg(not(test))]
impl Default for HostResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl HostResolver {
    #[cfg(test)]
    pub fn mock(mx_host: &'static str, mx_port: u16) -> Self {
        Self {
            resolver: Resolver { mx_host, mx_port },
        }
    }

    /// Returns the ordered list of (host, port) candidates to try: MX records
    /// first by ascending preference, then the fallback list, all on port 25
    /// except MX entries that embed a non-default port (test-only).
    pub async fn candidates(&self, domain: &str) -> Result<Vec<(String, u16)>, HostDiscoveryError> {
        let fqdn = format!("{domain}{}", if domain.ends_with('.') { "" } else { "." });
        let mut candidates = Vec::new();

        if let Ok(lookup) = self.resolver.mx_lookup(&fqdn).await {
            let mut records: Vec<_> = lookup.iter().collect();
            records.sort_by_key(|mx| mx.preference());
            for mx in records {
                candidates.push((mx.exchange().to_utf8(), mx_port(&mx)));
            }
        }

        for host in default_fallback_hosts(domain) {
            if !candidates.iter().any(|(h, _)| h == &host) {
                candidates.push((host, 25));
            }
        }

        if candidates.is_empty() {
            return Err(HostDiscoveryError::Exhausted(domain.to_string()));
        }
        Ok(candidates)
    }
}

// MX RDATA carries only preference and exchange, no port; real MX targets are
// always contacted on 25. The mock resolver's port is test-only so retry and
// failover logic can be exercised against a host that isn't actually 25.
#[cfg(not(test))]
fn mx_port<T>(_mx: &T) -> u16 {
    25
}

#[cfg(test)]
fn mx_port(mx: &mock::Mx) -> u16 {
    mx.port()
}

#[cfg(test)]
pub mod mock {
    #[derive(Clone, Copy)]
    pub struct Resolver {
        pub mx_host: &'static str,
        pub mx_port: u16,
    }

    impl Resolver {
        pub async fn mx_lookup(&self, _: impl AsRef<str>) -> Result<[Mx; 1], ()> {
            Ok([Mx(*self)])
        }
    }

    pub struct Mx(Resolver);

    impl Mx {
        pub fn preference(&self) -> u16 {
            5
        }
        pub fn exchange(&self) -> Exchange {
            Exchange(self.0)
        }
        pub fn port(&self) -> u16 {
            self.0.mx_port
        }
    }

    pub struct Exchange(Resolver);

    impl Exchange {
        pub fn to_utf8(&self) -> String {
            self.0.mx_host.to_string()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn mx_preferred_over_fallback() {
        let resolver = HostResolver::mock("mx1.example.com", 2525);
        let candidates = resolver.candidates("example.com").await.unwrap();
        assert_eq!(candidates[0], ("mx1.example.com".to_string(), 2525));
        assert!(candidates.iter().any(|(h, _)| h == "mail.example.com"));
    }
}
