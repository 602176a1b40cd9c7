use std::net::{IpAddr, SocketAddr};

use botgate_common::RequestMeta;
use ipnet::IpNet;
use thiserror::Error;
use tracing::warn;

/// Why a request could not be tied to a client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("missing client IP")]
    MissingIp,
    #[error("invalid IP format: {0}")]
    InvalidIpFormat(String),
    #[error("could not determine network")]
    NoNetwork,
}

/// Prefix lengths used to group addresses into networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkPrefixes {
    pub ipv4: u8,
    pub ipv6: u8,
}

impl Default for NetworkPrefixes {
    fn default() -> Self {
        Self { ipv4: 24, ipv6: 48 }
    }
}

/// Who a request comes from, as far as the gate can tell.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    ip: IpAddr,
    network: IpNet,
    fingerprint: String,
    is_suspicious: bool,
}

impl ClientIdentity {
    pub fn from_request(req: &RequestMeta, prefixes: NetworkPrefixes) -> Result<Self, IdentityError> {
        let raw = resolve_client_ip(req).ok_or(IdentityError::MissingIp)?;
        let ip: IpAddr = raw
            .parse()
            .map_err(|_| IdentityError::InvalidIpFormat(raw.clone()))?;
        let ip = ip.to_canonical();
        let network = network_of(ip, prefixes)?;
        let fingerprint = fingerprint(
            &network,
            req.header("accept-language"),
            req.header("user-agent"),
        );

        Ok(Self {
            ip,
            network,
            fingerprint,
            is_suspicious: false,
        })
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn network(&self) -> IpNet {
        self.network
    }

    /// Registry key for this client's network, e.g. `1.2.3.0/24`.
    pub fn network_key(&self) -> String {
        self.network.to_string()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn is_suspicious(&self) -> bool {
        self.is_suspicious
    }

    pub fn mark_suspicious(&mut self) {
        self.is_suspicious = true;
    }

    pub fn clear_suspicion(&mut self) {
        self.is_suspicious = false;
    }

    pub fn is_link_local(&self) -> bool {
        is_link_local(self.ip)
    }
}

/// Address of the immediate peer, with any port stripped.
pub fn peer_ip(req: &RequestMeta) -> Option<IpAddr> {
    let raw = req.remote_addr.as_deref()?.trim();
    raw.parse::<SocketAddr>()
        .map(|sa| sa.ip())
        .or_else(|_| raw.parse::<IpAddr>())
        .ok()
        .map(|ip| ip.to_canonical())
}

fn peer_host(raw: &str) -> String {
    raw.parse::<SocketAddr>()
        .map(|sa| sa.ip().to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Client address as a string, honoring `X-Real-IP` and `X-Forwarded-For`
/// only when the peer is a private or loopback address.
pub fn resolve_client_ip(req: &RequestMeta) -> Option<String> {
    let raw_peer = req.remote_addr.as_deref().map(str::trim).unwrap_or("");
    let remote = peer_host(raw_peer);

    if peer_ip(req).is_some_and(is_trusted_proxy) {
        let real_ip = req.header("x-real-ip").trim();
        if !real_ip.is_empty() {
            return Some(real_ip.to_string());
        }

        let forwarded = req.header("x-forwarded-for").trim();
        if !forwarded.is_empty() {
            return forwarded
                .rsplit(',')
                .next()
                .map(|last| last.trim().to_string());
        }
    } else if req.has_header("x-real-ip") || req.has_header("x-forwarded-for") {
        warn!(remote_ip = %remote, "request from untrusted source, ignoring proxy headers");
    }

    if remote.is_empty() {
        warn!("could not determine client IP");
        return None;
    }
    Some(remote)
}

pub fn is_private(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => v4.is_private(),
        // fc00::/7
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

/// Peers whose forwarding headers are believed.
pub fn is_trusted_proxy(ip: IpAddr) -> bool {
    is_private(ip) || ip.is_loopback()
}

/// `169.254.0.0/16` or `fe80::/10`.
pub fn is_link_local(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// Mask `ip` down to its network.
pub fn network_of(ip: IpAddr, prefixes: NetworkPrefixes) -> Result<IpNet, IdentityError> {
    let prefix = match ip {
        IpAddr::V4(_) => prefixes.ipv4,
        IpAddr::V6(_) => prefixes.ipv6,
    };
    IpNet::new(ip, prefix)
        .map(|net| net.trunc())
        .map_err(|_| IdentityError::NoNetwork)
}

const FNV32_OFFSET: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1 (multiply, then xor).
fn fnv1_32(data: &[u8]) -> u32 {
    data.iter().fold(FNV32_OFFSET, |hash, byte| {
        hash.wrapping_mul(FNV32_PRIME) ^ u32::from(*byte)
    })
}

/// Low-entropy client fingerprint: FNV-1 over network, language and agent,
/// rendered in decimal.
pub fn fingerprint(network: &IpNet, accept_language: &str, user_agent: &str) -> String {
    let input = format!("{network}{accept_language}{user_agent}");
    fnv1_32(input.as_bytes()).to_string()
}

/// TLS to us, or a private-network proxy saying it terminated TLS.
pub fn is_secure(req: &RequestMeta) -> bool {
    if req.tls {
        return true;
    }
    peer_ip(req).is_some_and(is_private) && req.header("x-forwarded-proto") == "https"
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue, Method};

    fn request(remote: Option<&str>, headers: &[(&'static str, &'static str)]) -> RequestMeta {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        RequestMeta::new(
            Method::GET,
            "/".parse().unwrap(),
            map,
            remote.map(String::from),
        )
    }

    #[test]
    fn fnv1_reference_values() {
        assert_eq!(fnv1_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1_32(b"a"), 0x050c_5d7e);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let net: IpNet = "1.2.3.0/24".parse().unwrap();
        let a = fingerprint(&net, "en-US", "Mozilla/5.0");
        let b = fingerprint(&net, "en-US", "Mozilla/5.0");
        assert_eq!(a, b);
        assert!(a.parse::<u32>().is_ok());
        assert_ne!(a, fingerprint(&net, "de-DE", "Mozilla/5.0"));
    }

    #[test]
    fn network_masks_to_prefix() {
        let prefixes = NetworkPrefixes::default();
        let v4 = network_of("1.2.3.4".parse().unwrap(), prefixes).unwrap();
        assert_eq!(v4.to_string(), "1.2.3.0/24");

        let prefixes = NetworkPrefixes { ipv4: 24, ipv6: 64 };
        let v6 = network_of("2001:db8:1:2:3:4:5:6".parse().unwrap(), prefixes).unwrap();
        assert_eq!(v6.to_string(), "2001:db8:1:2::/64");
    }

    #[test]
    fn bad_prefix_has_no_network() {
        let prefixes = NetworkPrefixes { ipv4: 40, ipv6: 48 };
        assert_eq!(
            network_of("1.2.3.4".parse().unwrap(), prefixes),
            Err(IdentityError::NoNetwork)
        );
    }

    #[test]
    fn direct_peer_used_without_proxy_headers() {
        let req = request(Some("1.2.3.4:5678"), &[]);
        assert_eq!(resolve_client_ip(&req).as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn trusted_proxy_headers() {
        let req = request(Some("10.0.0.1:80"), &[("x-real-ip", " 5.6.7.8 ")]);
        assert_eq!(resolve_client_ip(&req).as_deref(), Some("5.6.7.8"));

        let req = request(
            Some("127.0.0.1:80"),
            &[("x-forwarded-for", "1.1.1.1, 2.2.2.2, 3.3.3.3")],
        );
        assert_eq!(resolve_client_ip(&req).as_deref(), Some("3.3.3.3"));
    }

    #[test]
    fn untrusted_proxy_headers_ignored() {
        let req = request(Some("8.8.8.8:443"), &[("x-real-ip", "5.6.7.8")]);
        assert_eq!(resolve_client_ip(&req).as_deref(), Some("8.8.8.8"));
    }

    #[test]
    fn ipv6_peer_with_port() {
        let req = request(Some("[2001:db8::1]:443"), &[]);
        assert_eq!(resolve_client_ip(&req).as_deref(), Some("2001:db8::1"));
    }

    #[test]
    fn identity_errors() {
        let req = request(None, &[]);
        assert_eq!(
            ClientIdentity::from_request(&req, NetworkPrefixes::default()).unwrap_err(),
            IdentityError::MissingIp
        );

        let req = request(Some("10.0.0.1:80"), &[("x-real-ip", "not-an-ip")]);
        assert!(matches!(
            ClientIdentity::from_request(&req, NetworkPrefixes::default()),
            Err(IdentityError::InvalidIpFormat(_))
        ));
    }

    #[test]
    fn identity_carries_network_and_fingerprint() {
        let req = request(
            Some("1.2.3.4:1000"),
            &[("accept-language", "en"), ("user-agent", "Mozilla/5.0")],
        );
        let mut id = ClientIdentity::from_request(&req, NetworkPrefixes::default()).unwrap();
        assert_eq!(id.network_key(), "1.2.3.0/24");
        assert_eq!(id.fingerprint(), fingerprint(&id.network(), "en", "Mozilla/5.0"));
        assert!(!id.is_suspicious());

        id.mark_suspicious();
        assert!(id.is_suspicious());
        id.clear_suspicion();
        assert!(!id.is_suspicious());
    }

    #[test]
    fn link_local_ranges() {
        assert!(is_link_local("169.254.1.1".parse().unwrap()));
        assert!(is_link_local("fe80::1".parse().unwrap()));
        assert!(!is_link_local("10.0.0.1".parse().unwrap()));
        assert!(!is_link_local("fec0::1".parse().unwrap()));
    }

    #[test]
    fn private_ranges() {
        assert!(is_private("192.168.0.1".parse().unwrap()));
        assert!(is_private("fd12::1".parse().unwrap()));
        assert!(!is_private("8.8.8.8".parse().unwrap()));
        assert!(is_trusted_proxy("::1".parse().unwrap()));
    }

    #[test]
    fn secure_connection_detection() {
        let req = request(Some("10.0.0.1:80"), &[("x-forwarded-proto", "https")]);
        assert!(is_secure(&req));

        let req = request(Some("8.8.8.8:80"), &[("x-forwarded-proto", "https")]);
        assert!(!is_secure(&req));

        let req = request(Some("8.8.8.8:80"), &[]).with_tls(true);
        assert!(is_secure(&req));
    }
}
