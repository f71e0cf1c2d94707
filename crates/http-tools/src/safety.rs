//! Outbound HTTP safety controls (SSRF protection, size limits, redaction).
//!
//! Policy-only: the server decides which policy applies. Token endpoints and the target API are
//! operator-configured, so the default is permissive; `restricted` is available for hosted
//! deployments.

use crate::error::{HttpToolsError, Result};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use tokio::net::lookup_host;
use url::Url;

const MAX_REDIRECTS: usize = 10;

enum Precheck {
    Allowed,
    /// A hostname whose addresses still have to be checked.
    Resolve { host: String, port: u16 },
}

#[derive(Debug, Clone)]
pub struct OutboundHttpSafety {
    /// If set, only these hosts are allowed (case-insensitive).
    pub allowed_hosts: Option<HashSet<String>>,
    /// If true, allow private/loopback/link-local/reserved destination IPs.
    pub allow_private_networks: bool,
    /// Maximum response body size (bytes). `None` = unlimited.
    pub max_response_bytes: Option<usize>,
    /// Follow up to 10 redirects. Every hop is re-checked against the same rules; when private
    /// networks are blocked, only redirects to public literal IPs are followed because a hop's
    /// hostname cannot be resolved inside the redirect policy.
    pub follow_redirects: bool,
}

impl Default for OutboundHttpSafety {
    fn default() -> Self {
        Self::permissive()
    }
}

impl OutboundHttpSafety {
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            allowed_hosts: None,
            allow_private_networks: true,
            max_response_bytes: None,
            follow_redirects: true,
        }
    }

    /// Policy for hosted deployments: public destinations only, 1 MiB responses, no redirects.
    #[must_use]
    pub fn restricted() -> Self {
        Self {
            allowed_hosts: None,
            allow_private_networks: false,
            max_response_bytes: Some(1024 * 1024),
            follow_redirects: false,
        }
    }

    /// Build a reqwest client honoring the redirect setting and a default request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn build_client(&self, timeout: Duration) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .redirect(self.redirect_policy())
            .timeout(timeout)
            .build()
            .map_err(HttpToolsError::from)
    }

    fn redirect_policy(&self) -> reqwest::redirect::Policy {
        if !self.follow_redirects {
            return reqwest::redirect::Policy::none();
        }
        let policy = self.clone();
        reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            match policy.precheck(attempt.url()) {
                Ok(Precheck::Allowed) => attempt.follow(),
                Ok(Precheck::Resolve { host, .. }) => attempt.error(format!(
                    "redirect to '{host}' refused: private networks are blocked"
                )),
                Err(e) => attempt.error(format!("redirect refused: {e}")),
            }
        })
    }

    /// Checks that need no DNS lookup.
    fn precheck(&self, url: &Url) -> Result<Precheck> {
        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(HttpToolsError::Blocked(format!(
                "unsupported URL scheme '{scheme}'"
            )));
        }

        let Some(host) = url.host_str() else {
            return Err(HttpToolsError::Blocked("missing URL host".to_string()));
        };

        if let Some(allowed) = &self.allowed_hosts
            && !allowed.contains(&host.to_ascii_lowercase())
        {
            return Err(HttpToolsError::Blocked(format!(
                "host '{host}' not in allowlist"
            )));
        }

        if self.allow_private_networks {
            return Ok(Precheck::Allowed);
        }

        let literal = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = literal.parse::<IpAddr>() {
            return match denial_reason(ip) {
                Some(reason) => Err(HttpToolsError::Blocked(format!(
                    "destination IP '{ip}' is {reason}"
                ))),
                None => Ok(Precheck::Allowed),
            };
        }

        Ok(Precheck::Resolve {
            host: host.to_string(),
            port: url.port_or_known_default().unwrap_or(443),
        })
    }

    /// Validate a URL before making an outbound request.
    ///
    /// # Errors
    ///
    /// Returns an error for non-`http(s)` schemes, hosts outside the allowlist, and (unless
    /// private networks are allowed) hosts resolving to loopback/private/reserved ranges.
    pub async fn check_url(&self, url: &Url) -> Result<()> {
        let (host, port) = match self.precheck(url)? {
            Precheck::Allowed => return Ok(()),
            Precheck::Resolve { host, port } => (host, port),
        };
        let addrs = lookup_host((host.as_str(), port))
            .await
            .map_err(|e| HttpToolsError::Dns(format!("host '{host}': {e}")))?;

        let mut saw_any = false;
        for addr in addrs {
            saw_any = true;
            if let Some(reason) = denial_reason(addr.ip()) {
                return Err(HttpToolsError::Blocked(format!(
                    "host '{host}' resolved to '{}', which is {reason}",
                    addr.ip()
                )));
            }
        }

        if !saw_any {
            return Err(HttpToolsError::Dns(format!(
                "host '{host}' resolved to no addresses"
            )));
        }

        Ok(())
    }
}

/// Drop credentials, query and fragment from a URL before it is logged or returned to a caller.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    if e.is_timeout() && !msg.contains("timed out") {
        msg.push_str(" (timed out)");
    }
    msg
}

fn denial_reason(ip: IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => denial_reason_v4(v4),
        IpAddr::V6(v6) => denial_reason_v6(v6),
    }
}

fn denial_reason_v4(ip: Ipv4Addr) -> Option<&'static str> {
    let oct = ip.octets();
    if ip.is_loopback() {
        Some("loopback")
    } else if ip.is_private() {
        Some("private")
    } else if ip.is_link_local() {
        // Includes cloud metadata endpoints (169.254.169.254).
        Some("link-local")
    } else if ip.is_unspecified() || ip.is_broadcast() || ip.is_multicast() {
        Some("not unicast")
    } else if oct[0] == 100 && (64..=127).contains(&oct[1]) {
        Some("carrier-grade NAT")
    } else if oct[0] >= 240 {
        Some("reserved")
    } else {
        None
    }
}

fn denial_reason_v6(ip: Ipv6Addr) -> Option<&'static str> {
    if ip.is_loopback() {
        Some("loopback")
    } else if ip.is_unspecified() || ip.is_multicast() {
        Some("not unicast")
    } else if ip.is_unique_local() {
        Some("private")
    } else if ip.is_unicast_link_local() {
        Some("link-local")
    } else {
        None
    }
}
