use super::quota::{QuotaDecision, QuotaGate};
use crate::config::{DepthConfig, QuotaConfig};
use ipnetwork::IpNetwork;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;
use tracing::{debug, warn};

/// Result-depth tiers, ordered by how many results they unlock
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum DepthTier {
    Low,
    Med,
    High,
}

impl DepthTier {
    pub const ALL: [Self; 3] = [Self::Low, Self::Med, Self::High];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Med => "med",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for DepthTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepthTier {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "med" | "medium" => Ok(Self::Med),
            "high" => Ok(Self::High),
            other => Err(crate::Error::InvalidInput {
                field: "depth".to_string(),
                reason: format!("Unknown depth '{other}' (expected low, med or high)"),
            }),
        }
    }
}

impl DepthConfig {
    #[must_use]
    pub const fn cap(&self, tier: DepthTier) -> u32 {
        match tier {
            DepthTier::Low => self.low,
            DepthTier::Med => self.med,
            DepthTier::High => self.high,
        }
    }

    /// Smallest tier whose cap covers `max_results`
    #[must_use]
    pub fn tier_for(&self, max_results: u32) -> DepthTier {
        DepthTier::ALL
            .into_iter()
            .find(|tier| self.cap(*tier) >= max_results)
            .unwrap_or(DepthTier::High)
    }

    /// Tiers reachable without a key or bypass
    #[must_use]
    pub fn allowed_depths(&self) -> Vec<DepthTier> {
        DepthTier::ALL
            .into_iter()
            .filter(|tier| *tier <= self.default_tier)
            .collect()
    }

    #[must_use]
    pub fn caps(&self) -> BTreeMap<DepthTier, u32> {
        DepthTier::ALL.into_iter().map(|t| (t, self.cap(t))).collect()
    }
}

/// Depth a request asked for, resolved to a tier and a per-source result count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthRequest {
    pub tier: DepthTier,
    pub max_results: u32,
}

impl DepthRequest {
    /// An explicit tier wins; otherwise the tier is the smallest one covering `max_results`
    #[must_use]
    pub fn resolve(
        depth: Option<DepthTier>,
        max_results: Option<u32>,
        default_max_results: u32,
        caps: &DepthConfig,
    ) -> Self {
        match (depth, max_results.filter(|n| *n > 0)) {
            (Some(tier), requested) => Self {
                tier,
                max_results: requested.map_or(caps.cap(tier), |n| n.min(caps.cap(tier))),
            },
            (None, Some(n)) => Self {
                tier: caps.tier_for(n),
                max_results: n.min(caps.high),
            },
            (None, None) => Self {
                tier: caps.tier_for(default_max_results),
                max_results: default_max_results.min(caps.high),
            },
        }
    }
}

/// Why a request was turned away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed { remaining: i64 },
    ApiKeyRequired,
    DepthDenied { allowed_up_to: DepthTier },
    QuotaExceeded { remaining: i64, reset_in: u64 },
}

impl AccessDecision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Who skips the quota: loopback, listed addresses and listed networks
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    pub bypass_ips: Vec<IpAddr>,
    pub bypass_cidrs: Vec<IpNetwork>,
    pub require_api_key: bool,
}

impl AccessPolicy {
    #[must_use]
    pub fn from_config(config: &QuotaConfig) -> Self {
        let bypass_ips = config
            .bypass_ips
            .iter()
            .filter_map(|s| match s.trim().parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(e) => {
                    warn!("Ignoring invalid bypass IP '{}': {}", s, e);
                    None
                }
            })
            .collect();
        let bypass_cidrs = config
            .bypass_cidrs
            .iter()
            .filter_map(|s| match IpNetwork::from_str(s.trim()) {
                Ok(net) => Some(net),
                Err(e) => {
                    warn!("Ignoring invalid bypass CIDR '{}': {}", s, e);
                    None
                }
            })
            .collect();

        Self {
            bypass_ips,
            bypass_cidrs,
            require_api_key: config.require_api_key,
        }
    }

    #[must_use]
    pub fn is_bypassed(&self, ip: IpAddr) -> bool {
        ip.is_loopback()
            || self.bypass_ips.contains(&ip)
            || self.bypass_cidrs.iter().any(|cidr| cidr.contains(ip))
    }
}

/// Quota and depth gate in front of the research endpoints
#[derive(Debug)]
pub struct AccessGate {
    policy: AccessPolicy,
    depth: DepthConfig,
    quota: QuotaGate,
}

impl AccessGate {
    #[must_use]
    pub fn new(policy: AccessPolicy, depth: DepthConfig, quota: QuotaGate) -> Self {
        Self {
            policy,
            depth,
            quota,
        }
    }

    #[must_use]
    pub fn from_config(quota: &QuotaConfig, depth: &DepthConfig) -> Self {
        Self::new(
            AccessPolicy::from_config(quota),
            depth.clone(),
            QuotaGate::from_config(quota),
        )
    }

    #[must_use]
    pub fn depth(&self) -> &DepthConfig {
        &self.depth
    }

    #[must_use]
    pub fn quota(&self) -> &QuotaGate {
        &self.quota
    }

    #[must_use]
    pub fn requires_api_key(&self) -> bool {
        self.policy.require_api_key
    }

    /// Decide whether `ip` may run a request at `tier`; only allowed requests spend quota
    pub fn authorize(&self, ip: IpAddr, api_key: Option<&str>, tier: DepthTier) -> AccessDecision {
        let has_key = api_key.is_some_and(|k| !k.trim().is_empty());
        let privileged = has_key || self.policy.is_bypassed(ip);

        if privileged {
            debug!("Access bypass for {} (api key: {})", ip, has_key);
            return AccessDecision::Allowed { remaining: -1 };
        }

        if self.policy.require_api_key {
            return AccessDecision::ApiKeyRequired;
        }

        if tier > self.depth.default_tier {
            return AccessDecision::DepthDenied {
                allowed_up_to: self.depth.default_tier,
            };
        }

        let QuotaDecision {
            allowed,
            remaining,
            reset_in_secs,
        } = self.quota.check_and_increment(ip);
        if allowed {
            AccessDecision::Allowed { remaining }
        } else {
            AccessDecision::QuotaExceeded {
                remaining,
                reset_in: reset_in_secs,
            }
        }
    }
}
