//! Upstream URL hygiene for the proxy.
//!
//! Public https endpoints are allowed by default. Loopback and private
//! network targets (a local llama.cpp or LM Studio server) need
//! `proxy.allow_local`, and plain http is accepted for loopback only. A
//! non-empty `proxy.allowed_hosts` narrows the set further; entries match
//! exactly or, written `*.example.com`, any subdomain.

use std::net::{Ipv4Addr, Ipv6Addr};

use thoughtline_core::config::ProxyConfig;
use url::{Host, Url};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("baseUrl is not a valid URL: {0}")]
    InvalidUrl(String),

    #[error("baseUrl must not contain credentials")]
    Credentials,

    #[error("baseUrl must not contain a query string or fragment")]
    QueryOrFragment,

    #[error("baseUrl must use https (got {0})")]
    Scheme(String),

    #[error("baseUrl has no host")]
    MissingHost,

    #[error("upstream host {0} is on a local or private network")]
    LocalHost(String),

    #[error("upstream host {0} is not in the allowed host list")]
    NotAllowed(String),
}

#[derive(Debug, Clone, Default)]
pub struct UpstreamPolicy {
    allowed_hosts: Vec<String>,
    allow_local: bool,
}

impl UpstreamPolicy {
    pub fn new(allowed_hosts: Vec<String>, allow_local: bool) -> Self {
        Self {
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            allow_local,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.allowed_hosts.clone(), config.allow_local)
    }

    /// Validate a client-supplied base URL and return it parsed.
    pub fn check(&self, base_url: &str) -> Result<Url, PolicyError> {
        let url = Url::parse(base_url.trim()).map_err(|e| PolicyError::InvalidUrl(e.to_string()))?;

        if !url.username().is_empty() || url.password().is_some() {
            return Err(PolicyError::Credentials);
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(PolicyError::QueryOrFragment);
        }

        let host = url.host().ok_or(PolicyError::MissingHost)?;
        let host_name = url.host_str().unwrap_or_default().to_string();
        let local = is_local(&host);

        match url.scheme() {
            "https" => {}
            "http" if self.allow_local && is_loopback(&host) => {}
            other => return Err(PolicyError::Scheme(other.to_string())),
        }
        if local && !self.allow_local {
            return Err(PolicyError::LocalHost(host_name));
        }
        if !self.host_allowed(&host_name) {
            return Err(PolicyError::NotAllowed(host_name));
        }
        Ok(url)
    }

    fn host_allowed(&self, host: &str) -> bool {
        if self.allowed_hosts.is_empty() {
            return true;
        }
        let host = host.to_ascii_lowercase();
        self.allowed_hosts.iter().any(|entry| {
            if entry == "*" {
                return true;
            }
            match entry.strip_prefix("*.") {
                Some(suffix) => host
                    .strip_suffix(suffix)
                    .is_some_and(|prefix| prefix.ends_with('.') && prefix.len() > 1),
                None => *entry == host,
            }
        })
    }
}

fn is_local(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(_) => is_loopback(host),
        Host::Ipv4(ip) => is_local_v4(ip),
        Host::Ipv6(ip) => is_local_v6(ip),
    }
}

/// Plain http is only ever sent to the machine itself.
fn is_loopback(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(name) => {
            let name = name.trim_end_matches('.').to_ascii_lowercase();
            name == "localhost" || name.ends_with(".localhost")
        }
        Host::Ipv4(ip) => ip.is_loopback(),
        Host::Ipv6(ip) => {
            ip.is_loopback() || ip.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

fn is_local_v4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
}

fn is_local_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_local_v4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique local fc00::/7
        || (first & 0xffc0) == 0xfe80 // link local fe80::/10
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> UpstreamPolicy {
        UpstreamPolicy::new(Vec::new(), false)
    }

    #[test]
    fn public_https_is_allowed() {
        let url = open().check("https://api.openai.com").unwrap();
        assert_eq!(url.host_str(), Some("api.openai.com"));
        assert!(open().check("https://api.anthropic.com/v1/").is_ok());
    }

    #[test]
    fn plain_http_is_rejected() {
        assert_eq!(
            open().check("http://api.openai.com"),
            Err(PolicyError::Scheme("http".to_string()))
        );
        assert!(matches!(open().check("ftp://example.com"), Err(PolicyError::Scheme(_))));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(open().check("not a url"), Err(PolicyError::InvalidUrl(_))));
    }

    #[test]
    fn credentials_query_and_fragment_are_rejected() {
        assert_eq!(
            open().check("https://user:pw@api.openai.com"),
            Err(PolicyError::Credentials)
        );
        assert_eq!(
            open().check("https://api.openai.com/?key=1"),
            Err(PolicyError::QueryOrFragment)
        );
        assert_eq!(
            open().check("https://api.openai.com/#x"),
            Err(PolicyError::QueryOrFragment)
        );
    }

    #[test]
    fn local_and_private_hosts_need_opt_in() {
        for url in [
            "https://localhost:8080",
            "https://127.0.0.1",
            "https://10.0.0.5",
            "https://192.168.1.20",
            "https://172.16.4.4",
            "https://169.254.169.254",
            "https://0.0.0.0",
            "https://[::1]",
            "https://[fd00::1]",
            "https://[::ffff:10.0.0.1]",
        ] {
            assert!(
                matches!(open().check(url), Err(PolicyError::LocalHost(_))),
                "{url} should be blocked"
            );
        }
    }

    #[test]
    fn allow_local_permits_http_to_local_only() {
        let policy = UpstreamPolicy::new(Vec::new(), true);
        assert!(policy.check("http://127.0.0.1:11434").is_ok());
        assert!(policy.check("http://localhost:1234/v1").is_ok());
        assert!(policy.check("https://192.168.1.2").is_ok());
        assert!(matches!(
            policy.check("http://192.168.1.2"),
            Err(PolicyError::Scheme(_))
        ));
        assert!(matches!(
            policy.check("http://api.openai.com"),
            Err(PolicyError::Scheme(_))
        ));
    }

    #[test]
    fn allowed_hosts_exact_and_wildcard() {
        let policy = UpstreamPolicy::new(
            vec!["api.openai.com".to_string(), "*.Example.com".to_string()],
            false,
        );
        assert!(policy.check("https://api.openai.com").is_ok());
        assert!(policy.check("https://llm.example.com").is_ok());
        assert!(policy.check("https://a.b.example.com").is_ok());
        assert!(matches!(
            policy.check("https://example.com"),
            Err(PolicyError::NotAllowed(_))
        ));
        assert!(matches!(
            policy.check("https://badexample.com"),
            Err(PolicyError::NotAllowed(_))
        ));
        assert!(matches!(
            policy.check("https://api.anthropic.com"),
            Err(PolicyError::NotAllowed(_))
        ));
    }
}
