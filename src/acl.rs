//! IP-based admission control.
//!
//! An [`IpAccessList`] holds an ordered set of CIDR rules plus a default
//! policy, and answers allow/deny for a peer address. Rules are appended
//! at runtime; evaluation never mutates the list, so the accept loop can
//! consult it on every connection while rules are being added.

use std::net::IpAddr;
use std::sync::RwLock;

use ipnetwork::IpNetwork;
use thiserror::Error;

/// Default admission decision when no rule matches a peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Admit peers that match no rule.
    Allow,
    /// Reject peers that match no rule.
    Deny,
}

/// A single access rule: a network prefix and the verdict for peers
/// inside it.
#[derive(Debug, Clone)]
struct AclRule {
    network: IpNetwork,
    allow: bool,
}

/// Error returned when a rule cannot be installed.
#[derive(Debug, Error)]
pub enum AclError {
    /// The network address or prefix length does not form a valid CIDR block.
    #[error("invalid network {network}/{prefix}: {source}")]
    InvalidNetwork {
        network: String,
        prefix: u8,
        source: ipnetwork::IpNetworkError,
    },
}

/// Thread-safe list of admission rules with a default policy.
///
/// Lookups take the most specific (longest prefix) matching rule; when
/// rules of equal specificity disagree, or nothing matches, the default
/// policy decides. Appending a rule is atomic with respect to lookups:
/// a concurrent [`check`](Self::check) sees either the list before or
/// after the append, never a partial rule.
pub struct IpAccessList {
    default_allow: bool,
    rules: RwLock<Vec<AclRule>>,
}

impl IpAccessList {
    /// Create an access list with the given default policy and no rules.
    pub fn new(default: Policy) -> Self {
        IpAccessList {
            default_allow: default == Policy::Allow,
            rules: RwLock::new(Vec::new()),
        }
    }

    /// Append a rule admitting or rejecting `network`/`prefix`.
    ///
    /// Fails with [`AclError::InvalidNetwork`] if the prefix length is out
    /// of range for the address family; already-installed rules are
    /// unaffected by a failed append.
    pub fn add(&self, network: IpAddr, prefix: u8, allow: bool) -> Result<(), AclError> {
        let network = IpNetwork::new(network, prefix).map_err(|e| AclError::InvalidNetwork {
            network: network.to_string(),
            prefix,
            source: e,
        })?;

        let mut rules = self.rules.write().unwrap();
        rules.push(AclRule { network, allow });
        Ok(())
    }

    /// Decide whether a peer at `addr` is admitted.
    pub fn check(&self, addr: IpAddr) -> bool {
        let rules = self.rules.read().unwrap();

        // Longest matching prefix wins; conflicting verdicts at the same
        // length fall back to the default policy.
        let mut best_prefix: Option<u8> = None;
        let mut verdict = self.default_allow;
        for rule in rules.iter().filter(|r| r.network.contains(addr)) {
            match best_prefix {
                Some(best) if rule.network.prefix() < best => {}
                Some(best) if rule.network.prefix() == best => {
                    if rule.allow != verdict {
                        verdict = self.default_allow;
                    }
                }
                _ => {
                    best_prefix = Some(rule.network.prefix());
                    verdict = rule.allow;
                }
            }
        }
        verdict
    }
}
