//! Leaf ASN lookup backends.
//!
//! Three backends share the same success/failure contract: a remote JSON API
//! (iptoasn-compatible), a DNS query against the Team Cymru origin zones,
//! and a fixed in-memory table for tests and air-gapped deployments.

use super::{Asn, AsnResolver};
use crate::config::{HttpBackendConfig, StaticAsnEntry};
use crate::error::ResolveError;
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

/// iptoasn-style API response.
#[derive(Debug, Deserialize)]
struct IpToAsnResponse {
    announced: bool,
    #[serde(default)]
    as_number: u32,
    #[serde(default)]
    as_description: Option<String>,
}

/// Remote JSON API backend.
pub struct HttpAsnResolver {
    config: HttpBackendConfig,
    client: Client,
}

impl HttpAsnResolver {
    /// Create a new HTTP backend.
    pub fn new(config: HttpBackendConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    fn url_for(&self, ip: IpAddr) -> String {
        self.config.url.replace("{ip}", &ip.to_string())
    }
}

#[async_trait]
impl AsnResolver for HttpAsnResolver {
    async fn resolve(&self, ip: IpAddr) -> Result<Asn, ResolveError> {
        let url = self.url_for(ip);
        debug!(ip = %ip, url = %url, "Querying ASN API");

        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ResolveError::RateLimited);
        }

        if !response.status().is_success() {
            return Err(ResolveError::InvalidResponse(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: IpToAsnResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        if !body.announced || body.as_number == 0 {
            return Err(ResolveError::Lookup(format!("{} is not announced", ip)));
        }

        let mut asn = Asn::new(body.as_number);
        if let Some(description) = body.as_description {
            asn = asn.with_organization(description);
        }

        debug!(ip = %ip, asn = %asn, "ASN API lookup complete");
        Ok(asn)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// DNS backend querying the Team Cymru origin zones.
///
/// Answers look like `"15169 | 8.8.8.0/24 | US | arin | 2000-03-30"`; only
/// the leading ASN field is used.
pub struct DnsAsnResolver {
    resolver: TokioAsyncResolver,
}

impl Default for DnsAsnResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsAsnResolver {
    /// Create a resolver using default DNS configuration. The underlying
    /// resolver is built once and reused across lookups.
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }

    /// Build the origin query name for an address.
    fn query_name(ip: IpAddr) -> String {
        match ip {
            IpAddr::V4(v4) => {
                let [a, b, c, d] = v4.octets();
                format!("{}.{}.{}.{}.origin.asn.cymru.com.", d, c, b, a)
            }
            IpAddr::V6(v6) => {
                let nibbles: Vec<String> = v6
                    .octets()
                    .iter()
                    .flat_map(|o| [o & 0x0f, o >> 4])
                    .map(|n| format!("{:x}", n))
                    .collect();
                // Octet-internal nibbles are already swapped; reverse octets.
                let mut parts = Vec::with_capacity(32);
                for chunk in nibbles.chunks(2).rev() {
                    parts.extend(chunk.iter().cloned());
                }
                format!("{}.origin6.asn.cymru.com.", parts.join("."))
            }
        }
    }

    fn parse_answer(txt: &str) -> Result<u32, ResolveError> {
        txt.split('|')
            .next()
            .map(str::trim)
            // Multi-origin prefixes list several ASNs; take the first.
            .and_then(|field| field.split_whitespace().next())
            .and_then(|asn| asn.parse::<u32>().ok())
            .ok_or_else(|| {
                ResolveError::InvalidResponse(format!("unparseable origin answer: {}", txt))
            })
    }
}

#[async_trait]
impl AsnResolver for DnsAsnResolver {
    async fn resolve(&self, ip: IpAddr) -> Result<Asn, ResolveError> {
        let query = Self::query_name(ip);
        debug!(ip = %ip, query = %query, "Querying origin ASN over DNS");

        let response = self
            .resolver
            .txt_lookup(query)
            .await
            .map_err(|e| ResolveError::Lookup(e.to_string()))?;

        let answer = response
            .iter()
            .next()
            .map(|txt| txt.to_string())
            .ok_or_else(|| ResolveError::Lookup(format!("no origin record for {}", ip)))?;

        let number = Self::parse_answer(&answer)?;
        debug!(ip = %ip, asn = number, "Origin ASN lookup complete");
        Ok(Asn::new(number))
    }

    fn name(&self) -> &str {
        "dns"
    }
}

/// Fixed in-memory lookup table.
pub struct StaticAsnResolver {
    table: HashMap<IpAddr, Asn>,
}

impl StaticAsnResolver {
    /// Build the table from configuration entries.
    pub fn from_entries(entries: &[StaticAsnEntry]) -> anyhow::Result<Self> {
        let mut table = HashMap::with_capacity(entries.len());
        for entry in entries {
            let ip: IpAddr = entry
                .ip
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid static resolver entry IP: {}", entry.ip))?;
            let mut asn = Asn::new(entry.asn);
            if let Some(ref organization) = entry.organization {
                asn = asn.with_organization(organization.clone());
            }
            table.insert(ip, asn);
        }
        Ok(Self { table })
    }
}

#[async_trait]
impl AsnResolver for StaticAsnResolver {
    async fn resolve(&self, ip: IpAddr) -> Result<Asn, ResolveError> {
        self.table
            .get(&ip)
            .cloned()
            .ok_or_else(|| ResolveError::Lookup(format!("no entry for {}", ip)))
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn static_entries() -> Vec<StaticAsnEntry> {
        vec![
            StaticAsnEntry {
                ip: "192.0.2.1".to_string(),
                asn: 64512,
                organization: Some("TEST-NET".to_string()),
            },
            StaticAsnEntry {
                ip: "2001:db8::1".to_string(),
                asn: 64513,
                organization: None,
            },
        ]
    }

    #[tokio::test]
    async fn test_static_resolver_hit_and_miss() {
        let resolver = StaticAsnResolver::from_entries(&static_entries()).unwrap();

        let asn = resolver.resolve("192.0.2.1".parse().unwrap()).await.unwrap();
        assert_eq!(asn.number, 64512);
        assert_eq!(asn.organization.as_deref(), Some("TEST-NET"));

        let asn6 = resolver.resolve("2001:db8::1".parse().unwrap()).await.unwrap();
        assert_eq!(asn6.number, 64513);

        let err = resolver
            .resolve("203.0.113.9".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Lookup(_)));
    }

    #[test]
    fn test_static_resolver_rejects_bad_ip() {
        let entries = vec![StaticAsnEntry {
            ip: "bogus".to_string(),
            asn: 1,
            organization: None,
        }];
        assert!(StaticAsnResolver::from_entries(&entries).is_err());
    }

    #[test]
    fn test_dns_query_name_v4() {
        let name = DnsAsnResolver::query_name("8.8.8.8".parse().unwrap());
        assert_eq!(name, "8.8.8.8.origin.asn.cymru.com.");

        let name = DnsAsnResolver::query_name("192.0.2.1".parse().unwrap());
        assert_eq!(name, "1.2.0.192.origin.asn.cymru.com.");
    }

    #[test]
    fn test_dns_query_name_v6_suffix() {
        let name = DnsAsnResolver::query_name("2001:db8::1".parse().unwrap());
        assert!(name.ends_with(".origin6.asn.cymru.com."));
        // 32 nibble labels + 4 zone labels, each dot-terminated.
        assert_eq!(name.matches('.').count(), 36);
        assert!(name.starts_with("1.0.0.0."));
    }

    #[test]
    fn test_dns_parse_answer() {
        assert_eq!(
            DnsAsnResolver::parse_answer("15169 | 8.8.8.0/24 | US | arin | 2000-03-30").unwrap(),
            15169
        );
        // Multi-origin answer.
        assert_eq!(
            DnsAsnResolver::parse_answer("64512 64513 | 192.0.2.0/24 | ZZ | test |").unwrap(),
            64512
        );
        assert!(DnsAsnResolver::parse_answer("garbage").is_err());
    }

    #[tokio::test]
    async fn test_http_resolver_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/as/ip/8.8.8.8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "announced": true,
                "as_number": 15169,
                "as_description": "GOOGLE",
            })))
            .mount(&server)
            .await;

        let resolver = HttpAsnResolver::new(HttpBackendConfig {
            url: format!("{}/v1/as/ip/{{ip}}", server.uri()),
            timeout_ms: 1000,
        });

        let asn = resolver.resolve("8.8.8.8".parse().unwrap()).await.unwrap();
        assert_eq!(asn.number, 15169);
        assert_eq!(asn.organization.as_deref(), Some("GOOGLE"));
    }

    #[tokio::test]
    async fn test_http_resolver_unannounced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "announced": false,
            })))
            .mount(&server)
            .await;

        let resolver = HttpAsnResolver::new(HttpBackendConfig {
            url: format!("{}/v1/as/ip/{{ip}}", server.uri()),
            timeout_ms: 1000,
        });

        let err = resolver
            .resolve("10.0.0.1".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Lookup(_)));
    }

    #[tokio::test]
    async fn test_http_resolver_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let resolver = HttpAsnResolver::new(HttpBackendConfig {
            url: format!("{}/v1/as/ip/{{ip}}", server.uri()),
            timeout_ms: 1000,
        });

        let err = resolver
            .resolve("8.8.8.8".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_http_resolver_rate_limited_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let resolver = HttpAsnResolver::new(HttpBackendConfig {
            url: format!("{}/v1/as/ip/{{ip}}", server.uri()),
            timeout_ms: 1000,
        });

        let err = resolver
            .resolve("8.8.8.8".parse().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::RateLimited);
    }
}
