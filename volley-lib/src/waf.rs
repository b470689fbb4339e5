//! Passive web application firewall detection.
//!
//! The [`WafDetector`] looks at every response the executor receives and
//! remembers, per host, which protection product answered. It never fails
//! and never influences the request itself.

use dashmap::DashMap;
use http::{HeaderMap, StatusCode};
use regex::RegexSet;
use serde::Serialize;
use std::fmt::Display;
use std::sync::LazyLock;
use url::Url;

use crate::ratelimit::HostKey;

/// Known protection products
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WafVendor {
    /// Cloudflare
    Cloudflare,
    /// Akamai Kona / Ghost
    Akamai,
    /// AWS WAF or CloudFront
    AwsWaf,
    /// Imperva Incapsula
    Imperva,
    /// Sucuri CloudProxy
    Sucuri,
    /// F5 BIG-IP ASM
    F5BigIp,
    /// `ModSecurity`
    ModSecurity,
    /// Barracuda
    Barracuda,
    /// A block page from an unidentified product
    Generic,
}

impl Display for WafVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Cloudflare => "Cloudflare",
            Self::Akamai => "Akamai",
            Self::AwsWaf => "AWS WAF",
            Self::Imperva => "Imperva Incapsula",
            Self::Sucuri => "Sucuri",
            Self::F5BigIp => "F5 BIG-IP",
            Self::ModSecurity => "ModSecurity",
            Self::Barracuda => "Barracuda",
            Self::Generic => "Generic WAF",
        };
        f.write_str(name)
    }
}

/// What was detected for a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WafDetection {
    /// The identified product
    pub vendor: WafVendor,
    /// The header or body pattern that matched
    pub evidence: String,
    /// Status of the response that revealed the product
    pub status: u16,
    /// Number of responses that matched so far
    pub hits: u64,
}

/// Header name (lowercase) and optional value substring identifying a vendor
const HEADER_SIGNATURES: &[(&str, Option<&str>, WafVendor)] = &[
    ("cf-ray", None, WafVendor::Cloudflare),
    ("cf-mitigated", None, WafVendor::Cloudflare),
    ("server", Some("cloudflare"), WafVendor::Cloudflare),
    ("x-akamai-transformed", None, WafVendor::Akamai),
    ("akamai-grn", None, WafVendor::Akamai),
    ("server", Some("akamaighost"), WafVendor::Akamai),
    ("x-amzn-waf-action", None, WafVendor::AwsWaf),
    ("x-amz-cf-id", None, WafVendor::AwsWaf),
    ("server", Some("awselb"), WafVendor::AwsWaf),
    ("x-iinfo", None, WafVendor::Imperva),
    ("x-cdn", Some("incapsula"), WafVendor::Imperva),
    ("set-cookie", Some("incap_ses"), WafVendor::Imperva),
    ("set-cookie", Some("visid_incap"), WafVendor::Imperva),
    ("x-sucuri-id", None, WafVendor::Sucuri),
    ("server", Some("sucuri"), WafVendor::Sucuri),
    ("set-cookie", Some("bigipserver"), WafVendor::F5BigIp),
    ("set-cookie", Some("ts01"), WafVendor::F5BigIp),
    ("server", Some("big-ip"), WafVendor::F5BigIp),
    ("server", Some("mod_security"), WafVendor::ModSecurity),
    ("server", Some("modsecurity"), WafVendor::ModSecurity),
    ("set-cookie", Some("barra_counter_session"), WafVendor::Barracuda),
    ("server", Some("barracuda"), WafVendor::Barracuda),
];

/// Statuses a block page is usually served with
const BLOCK_STATUSES: &[StatusCode] = &[
    StatusCode::FORBIDDEN,
    StatusCode::NOT_ACCEPTABLE,
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::NOT_IMPLEMENTED,
];

/// Body patterns of block pages, index-aligned with [`BODY_VENDORS`]
static BODY_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)attention required!? \| cloudflare",
        r"(?i)cloudflare ray id",
        r"(?i)incapsula incident id",
        r"(?i)access denied - sucuri website firewall",
        r"(?i)the requested url was rejected\. please consult with your administrator",
        r"(?i)mod_security|not acceptable!.*an appropriate representation",
        r"(?i)barracuda.{0,40}(blocked|firewall)",
        r"(?i)reference #\d+\.[0-9a-f]+\.\d+\.[0-9a-f]+",
        r"(?i)request (was )?blocked|web application firewall|access denied|security policy",
    ])
    .unwrap()
});

const BODY_VENDORS: &[WafVendor] = &[
    WafVendor::Cloudflare,
    WafVendor::Cloudflare,
    WafVendor::Imperva,
    WafVendor::Sucuri,
    WafVendor::F5BigIp,
    WafVendor::ModSecurity,
    WafVendor::Barracuda,
    WafVendor::Akamai,
    WafVendor::Generic,
];

/// Per-host WAF detection state
#[derive(Debug, Default)]
pub struct WafDetector {
    detections: DashMap<HostKey, WafDetection>,
}

impl WafDetector {
    /// Create a detector without detections
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect one response. Only updates detection state.
    pub fn analyze_response(
        &self,
        url: &Url,
        status: StatusCode,
        headers: &HeaderMap,
        body_sample: &[u8],
    ) {
        let Ok(host) = HostKey::try_from(url) else {
            log::debug!("WAF detection skipped for URL without host: {url}");
            return;
        };

        let Some((vendor, evidence)) =
            Self::match_headers(headers).or_else(|| Self::match_body(status, body_sample))
        else {
            return;
        };

        self.detections
            .entry(host.clone())
            .and_modify(|detection| detection.hits += 1)
            .or_insert_with(|| {
                log::info!("{vendor} detected on {host} ({evidence})");
                WafDetection {
                    vendor,
                    evidence,
                    status: status.as_u16(),
                    hits: 1,
                }
            });
    }

    fn match_headers(headers: &HeaderMap) -> Option<(WafVendor, String)> {
        HEADER_SIGNATURES
            .iter()
            .find_map(|(name, needle, vendor)| {
                headers.get_all(*name).iter().find_map(|value| {
                    let value = String::from_utf8_lossy(value.as_bytes()).to_lowercase();
                    match needle {
                        None => Some((*vendor, format!("header {name}"))),
                        Some(needle) if value.contains(needle) => {
                            Some((*vendor, format!("header {name}: {needle}")))
                        }
                        Some(_) => None,
                    }
                })
            })
    }

    fn match_body(status: StatusCode, body_sample: &[u8]) -> Option<(WafVendor, String)> {
        if !BLOCK_STATUSES.contains(&status) || body_sample.is_empty() {
            return None;
        }
        let body = String::from_utf8_lossy(body_sample);
        let index = BODY_PATTERNS.matches(&body).into_iter().next()?;
        let vendor = BODY_VENDORS.get(index).copied().unwrap_or(WafVendor::Generic);
        Some((vendor, format!("body pattern on {}", status.as_u16())))
    }

    /// All detections, one per host
    #[must_use]
    pub fn detections(&self) -> Vec<(HostKey, WafDetection)> {
        self.detections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// The detection for `host`, if any
    #[must_use]
    pub fn detection_for(&self, host: &HostKey) -> Option<WafDetection> {
        self.detections.get(host).map(|d| d.clone())
    }

    /// Whether a WAF was seen in front of `host`
    #[must_use]
    pub fn is_detected(&self, host: &HostKey) -> bool {
        self.detections.contains_key(host)
    }
}
