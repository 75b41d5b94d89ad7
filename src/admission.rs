//! URL admission control
//!
//! Decides whether a user-supplied URL may be fetched at all. The check is
//! lexical: the hostname string is matched against the configured deny-list
//! patterns and literal hostnames. A hostname that *resolves* to a private
//! address (DNS rebinding, or a record that changes after the check) is not
//! caught unless a [`HostResolver`] is plugged in.

use crate::{AdmissionConfig, ScrapeError};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::Arc;
use tracing::debug;
use url::{Host, Url};

/// A URL that passed admission. Only [`AdmissionGuard`] can construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUrl {
    url: Url,
    hostname: String,
}

impl ValidatedUrl {
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Lower-cased hostname as it was checked; IPv6 literals are unbracketed.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn normalized_href(&self) -> &str {
        self.url.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for ValidatedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Why a URL was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    InvalidFormat,
    UnsupportedScheme,
    PrivateAddress,
    BlockedHost,
    ResolvesToPrivate(IpAddr),
    ResolutionFailed(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::InvalidFormat => f.write_str("Invalid URL format"),
            Rejection::UnsupportedScheme => f.write_str("Only HTTP and HTTPS URLs are allowed"),
            Rejection::PrivateAddress => f.write_str("Private IP addresses are not allowed"),
            Rejection::BlockedHost => f.write_str("Access to this host is not allowed"),
            Rejection::ResolvesToPrivate(ip) => {
                write!(f, "Hostname resolves to a private IP address ({ip})")
            }
            Rejection::ResolutionFailed(e) => write!(f, "Hostname could not be resolved: {e}"),
        }
    }
}

impl From<Rejection> for ScrapeError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::InvalidFormat => ScrapeError::InvalidUrl(rejection.to_string()),
            other => ScrapeError::Forbidden(other.to_string()),
        }
    }
}

/// Outcome of admission; never partially valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed(ValidatedUrl),
    Rejected(Rejection),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed(_))
    }

    pub fn into_result(self) -> Result<ValidatedUrl, ScrapeError> {
        match self {
            Admission::Allowed(url) => Ok(url),
            Admission::Rejected(rejection) => Err(rejection.into()),
        }
    }
}

/// Strategy for hostname-to-address resolution
///
/// Lets a deployment add resolve-then-check on top of the lexical rules
/// without changing [`AdmissionGuard::validate`]'s contract.
#[cfg_attr(test, mockall::automock)]
pub trait HostResolver: Send + Sync {
    fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolves through the operating system. Blocking.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        Ok((host, port)
            .to_socket_addrs()?
            .map(|addr| addr.ip())
            .collect())
    }
}

struct GuardRules {
    patterns: Vec<Regex>,
    blocked_hosts: HashSet<String>,
    resolver: Option<Arc<dyn HostResolver>>,
}

/// Admission guard for user-supplied URLs. Cheap to clone.
#[derive(Clone)]
pub struct AdmissionGuard {
    rules: Arc<GuardRules>,
}

impl AdmissionGuard {
    /// Compile the deny-list. Installs [`SystemResolver`] when
    /// `config.resolve_hosts` is set.
    pub fn new(config: &AdmissionConfig) -> Result<Self, ScrapeError> {
        let resolver: Option<Arc<dyn HostResolver>> = if config.resolve_hosts {
            Some(Arc::new(SystemResolver))
        } else {
            None
        };
        Self::build(config, resolver)
    }

    pub fn with_resolver(
        config: &AdmissionConfig,
        resolver: Arc<dyn HostResolver>,
    ) -> Result<Self, ScrapeError> {
        Self::build(config, Some(resolver))
    }

    fn build(
        config: &AdmissionConfig,
        resolver: Option<Arc<dyn HostResolver>>,
    ) -> Result<Self, ScrapeError> {
        let patterns = config
            .blocked_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    ScrapeError::ConfigurationError(format!(
                        "Invalid blocked pattern '{pattern}': {e}"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let blocked_hosts = config
            .blocked_hosts
            .iter()
            .map(|host| host.to_lowercase())
            .collect();

        Ok(Self {
            rules: Arc::new(GuardRules {
                patterns,
                blocked_hosts,
                resolver,
            }),
        })
    }

    pub fn resolves_hosts(&self) -> bool {
        self.rules.resolver.is_some()
    }

    /// Admit or reject `raw_url`. Deterministic for the lexical rules; with a
    /// resolver installed the answer also depends on DNS.
    pub fn validate(&self, raw_url: &str) -> Admission {
        let validated = match self.validate_lexical(raw_url) {
            Admission::Allowed(validated) => validated,
            rejected => return rejected,
        };

        if let Some(resolver) = &self.rules.resolver {
            let port = validated.url.port_or_known_default().unwrap_or(80);
            if let Some(rejection) = check_resolved(resolver.as_ref(), &validated.hostname, port) {
                debug!(
                    "Rejecting host {} after resolution: {}",
                    validated.hostname, rejection
                );
                return Admission::Rejected(rejection);
            }
        }

        Admission::Allowed(validated)
    }

    /// Scheme, deny-list and blocked-host rules only. Never consults the
    /// resolver, so it is safe to call from non-blocking contexts such as the
    /// static client's redirect policy.
    pub fn validate_lexical(&self, raw_url: &str) -> Admission {
        let parsed = match Url::parse(raw_url.trim()) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Rejecting unparseable URL: {}", e);
                return Admission::Rejected(Rejection::InvalidFormat);
            }
        };

        if !matches!(parsed.scheme(), "http" | "https") {
            return Admission::Rejected(Rejection::UnsupportedScheme);
        }

        let hostname = match parsed.host() {
            Some(Host::Domain(domain)) => domain.trim_end_matches('.').to_lowercase(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Admission::Rejected(Rejection::InvalidFormat),
        };

        if let Some(rejection) = self.check_hostname(&hostname) {
            debug!("Rejecting host {}: {}", hostname, rejection);
            return Admission::Rejected(rejection);
        }

        Admission::Allowed(ValidatedUrl {
            url: parsed,
            hostname,
        })
    }

    /// [`validate`](Self::validate), moved off the async executor when a
    /// blocking resolver is installed.
    pub async fn admit(&self, raw_url: &str) -> Admission {
        if !self.resolves_hosts() {
            return self.validate(raw_url);
        }

        let guard = self.clone();
        let raw_url = raw_url.to_string();
        match tokio::task::spawn_blocking(move || guard.validate(&raw_url)).await {
            Ok(admission) => admission,
            Err(e) => Admission::Rejected(Rejection::ResolutionFailed(e.to_string())),
        }
    }

    fn check_hostname(&self, hostname: &str) -> Option<Rejection> {
        if self
            .rules
            .patterns
            .iter()
            .any(|pattern| pattern.is_match(hostname))
        {
            return Some(Rejection::PrivateAddress);
        }

        if self.rules.blocked_hosts.contains(hostname) {
            return Some(Rejection::BlockedHost);
        }

        None
    }
}

fn check_resolved(resolver: &dyn HostResolver, hostname: &str, port: u16) -> Option<Rejection> {
    match resolver.resolve(hostname, port) {
        Ok(addrs) => addrs
            .into_iter()
            .find(is_private_addr)
            .map(Rejection::ResolvesToPrivate),
        Err(e) => Some(Rejection::ResolutionFailed(e.to_string())),
    }
}

/// Typed private-range check used for resolved addresses.
pub fn is_private_addr(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_addr(&IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}
