//! Partition key derivation.

use std::net::IpAddr;

use super::rules::KeyStrategy;

/// Identifier used when neither a forwarded address nor a peer is known.
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// What the request pipeline knows about the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    /// Raw `X-Forwarded-For` header value, if present
    pub forwarded_for: Option<String>,
    /// Transport-level peer address
    pub peer: Option<IpAddr>,
    /// Authenticated principal id, if any
    pub principal: Option<String>,
}

impl RequestIdentity {
    /// Resolve the network origin.
    ///
    /// The first non-empty segment of the forwarded header wins when it is
    /// trusted; otherwise the peer address, otherwise [`UNKNOWN_ORIGIN`].
    pub fn origin(&self, trust_forwarded_for: bool) -> String {
        if trust_forwarded_for {
            let forwarded = self
                .forwarded_for
                .as_deref()
                .and_then(|h| h.split(',').next())
                .map(str::trim)
                .filter(|s| !s.is_empty());

            if let Some(addr) = forwarded {
                return addr.to_string();
            }
        }

        self.peer
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_ORIGIN.to_string())
    }

    fn principal(&self) -> Option<&str> {
        self.principal.as_deref().filter(|p| !p.is_empty())
    }
}

/// Which kind of identifier a partition was keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    Origin,
    Principal,
}

impl IdentifierKind {
    pub fn tag(&self) -> &'static str {
        match self {
            IdentifierKind::Origin => "origin",
            IdentifierKind::Principal => "principal",
        }
    }
}

/// A key that uniquely identifies a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    /// The rule this partition belongs to
    pub rule: String,
    /// The kind of identifier used
    pub kind: IdentifierKind,
    /// The identifier value
    pub identifier: String,
}

impl PartitionKey {
    /// Derive the key for `identity` under `strategy`.
    ///
    /// Returns `None` when the strategy needs a principal and there is none.
    pub fn derive(
        rule: &str,
        strategy: KeyStrategy,
        identity: &RequestIdentity,
        trust_forwarded_for: bool,
    ) -> Option<Self> {
        let (kind, identifier) = match (strategy, identity.principal()) {
            (KeyStrategy::Principal, None) => return None,
            (KeyStrategy::Principal | KeyStrategy::PrincipalOrOrigin, Some(principal)) => {
                (IdentifierKind::Principal, principal.to_string())
            }
            (KeyStrategy::Origin, _) | (KeyStrategy::PrincipalOrOrigin, None) => {
                (IdentifierKind::Origin, identity.origin(trust_forwarded_for))
            }
        };

        Some(Self {
            rule: rule.to_string(),
            kind,
            identifier,
        })
    }

    /// The flat store key, `rule:tag:identifier`.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}:{}", self.rule, self.kind.tag(), self.identifier)
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
