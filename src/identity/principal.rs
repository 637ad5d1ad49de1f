use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// A boolean capability attached to a Principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Create,
    Update,
    Delete,
}

impl Claim {
    pub fn as_str(self) -> &'static str {
        match self {
            Claim::Create => "create",
            Claim::Update => "update",
            Claim::Delete => "delete",
        }
    }
}

/// The capability set derived for a user. A pure function of the role grants
/// at derivation time; token-borne claims are frozen at issuance.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    #[serde(default)]
    pub can_create: bool,
    #[serde(default)]
    pub can_update: bool,
    #[serde(default)]
    pub can_delete: bool,
}

impl Claims {
    pub fn allows(&self, claim: Claim) -> bool {
        match claim {
            Claim::Create => self.can_create,
            Claim::Update => self.can_update,
            Claim::Delete => self.can_delete,
        }
    }
}

/// Resolved identity plus claims for the current request. Request-scoped and
/// derived; never stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    #[serde(default)]
    pub claims: Claims,
}

impl Principal {
    /// The single claim-check gate both gateways converge on. A missing
    /// claim is FORBIDDEN, which is never downgraded to not-found.
    pub fn require(&self, claim: Claim) -> AppResult<()> {
        if self.claims.allows(claim) {
            Ok(())
        } else {
            Err(AppError::forbidden(
                "missing_claim".into(),
                format!("user '{}' lacks the '{}' permission", self.username, claim.as_str()),
            ))
        }
    }
}
