//! Geolocation helpers that do not touch the network.
//!
//! Client IP selection from request headers, loopback/public classification,
//! the country flag table, and conversion of an ip-api style payload into a
//! [`GeoRecord`]. The HTTP side lives in the pipeline crate.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::Deserialize;

use crate::types::{GeoRecord, Timestamp};

/// Shown for country codes outside [`FLAG_COUNTRY_CODES`].
pub const GLOBE_FLAG: &str = "\u{1F30D}";

/// Placeholder used for every text field of a degraded record.
pub const UNKNOWN: &str = "Unknown";

/// Country code of a degraded record.
pub const UNKNOWN_COUNTRY_CODE: &str = "XX";

/// Country codes that get an emoji flag.
const FLAG_COUNTRY_CODES: &[&str] = &[
    // Americas
    "US", "CA", "MX", "BR", "AR", "CL", "CO", "PE", "VE", "UY", "PY", "BO", "EC", "CR", "PA",
    "CU", "DO", "GT", "HN", "SV", "NI", "PR", "JM",
    // Europe
    "GB", "IE", "FR", "DE", "IT", "ES", "PT", "NL", "BE", "LU", "CH", "AT", "DK", "SE", "NO",
    "FI", "IS", "PL", "CZ", "SK", "HU", "RO", "BG", "GR", "TR", "UA", "RU", "BY", "LT", "LV",
    "EE", "HR", "SI", "RS",
    // Asia / Pacific
    "CN", "JP", "KR", "IN", "ID", "TH", "VN", "PH", "MY", "SG", "HK", "TW", "PK", "BD", "LK",
    "NP", "AU", "NZ",
    // Africa / Middle East
    "ZA", "NG", "EG", "KE", "MA", "GH", "ET", "TZ", "DZ", "TN", "AE", "SA", "IL", "QA", "KW",
    "IR", "IQ", "JO", "LB",
];

/// Emoji flag for a two-letter country code, or the globe for anything not
/// in the table. Case-insensitive; never fails.
pub fn country_flag(country_code: &str) -> String {
    let code = country_code.trim().to_ascii_uppercase();
    if !FLAG_COUNTRY_CODES.contains(&code.as_str()) {
        return GLOBE_FLAG.to_string();
    }
    // Regional indicator symbols start at U+1F1E6 for 'A'.
    code.bytes()
        .filter_map(|b| char::from_u32(0x1F1E6 + u32::from(b - b'A')))
        .collect()
}

// ---------------------------------------------------------------------------
// Client IP selection
// ---------------------------------------------------------------------------

/// Pick the client IP from, in priority order, the first `X-Forwarded-For`
/// entry, `X-Real-IP`, then the socket peer address.
pub fn client_ip(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    remote_addr: Option<&str>,
) -> Option<String> {
    let forwarded = forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or_else(|| real_ip.map(str::trim).filter(|v| !v.is_empty()))
        .or_else(|| remote_addr.map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
}

/// Whether `ip` names this machine rather than a real client: loopback,
/// unspecified, `localhost`, or empty.
pub fn is_local_address(ip: &str) -> bool {
    let ip = ip.trim();
    if ip.is_empty() || ip.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match ip.parse::<IpAddr>() {
        Ok(addr) => addr.is_loopback() || addr.is_unspecified(),
        Err(_) => false,
    }
}

/// Whether `ip` is a routable public address (not private, loopback,
/// link-local, shared, documentation, multicast, or otherwise reserved).
pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(v4),
            None => is_public_v6(v6),
        },
    }
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    let reserved = ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || a == 0
        // 100.64.0.0/10 shared address space
        || (a == 100 && (64..=127).contains(&b))
        // 192.0.0.0/24 protocol assignments
        || (a == 192 && b == 0 && c == 0)
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b == 18 || b == 19))
        // 240.0.0.0/4 reserved
        || a >= 240;
    !reserved
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let reserved = ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
        // 2001:db8::/32 documentation
        || (first == 0x2001 && ip.segments()[1] == 0x0db8);
    !reserved
}

/// Parse a "what is my IP" response body, accepting only a public address.
pub fn parse_public_ip(body: &str) -> Option<IpAddr> {
    body.trim()
        .parse::<IpAddr>()
        .ok()
        .filter(|ip| is_public_ip(*ip))
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

impl GeoRecord {
    /// Placeholder record used whenever a lookup cannot be completed.
    pub fn degraded(ip: &str, error: impl Into<String>, fetched_at: Timestamp) -> Self {
        Self {
            ip: ip.to_string(),
            country: UNKNOWN.to_string(),
            country_code: UNKNOWN_COUNTRY_CODE.to_string(),
            region: UNKNOWN.to_string(),
            city: UNKNOWN.to_string(),
            lat: 0.0,
            lon: 0.0,
            timezone: UNKNOWN.to_string(),
            isp: UNKNOWN.to_string(),
            org: UNKNOWN.to_string(),
            flag: GLOBE_FLAG.to_string(),
            fetched_at,
            error: Some(error.into()),
        }
    }

    /// Whether this record holds placeholders instead of lookup data.
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// Response body of an ip-api compatible `/json/{ip}` endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpApiResponse {
    pub status: Option<String>,
    pub message: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region_name: Option<String>,
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub timezone: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
}

impl IpApiResponse {
    /// Convert into a record; anything but `status == "success"` degrades.
    pub fn into_record(self, ip: &str, fetched_at: Timestamp) -> GeoRecord {
        if self.status.as_deref() != Some("success") {
            let reason = self
                .message
                .unwrap_or_else(|| "geolocation service reported failure".to_string());
            return GeoRecord::degraded(ip, reason, fetched_at);
        }

        let or_unknown = |v: Option<String>| v.filter(|s| !s.is_empty()).unwrap_or(UNKNOWN.into());
        let country_code = self
            .country_code
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_COUNTRY_CODE.into());

        GeoRecord {
            ip: ip.to_string(),
            flag: country_flag(&country_code),
            country: or_unknown(self.country),
            country_code,
            region: or_unknown(self.region_name),
            city: or_unknown(self.city),
            lat: self.lat.unwrap_or(0.0),
            lon: self.lon.unwrap_or(0.0),
            timezone: or_unknown(self.timezone),
            isp: or_unknown(self.isp),
            org: or_unknown(self.org),
            fetched_at,
            error: None,
        }
    }
}
