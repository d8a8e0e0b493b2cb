//! Tenant context attached to every flow operation.
//!
//! Every read, write and lock issued by the orchestration core is qualified by
//! a [`TenantContext`]. A flow created under one tenant is invisible under any
//! other: lookups return "not found" rather than a cross-tenant row.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque (client, engagement, user) triple scoping an operation.
///
/// `client_id` and `engagement_id` partition the data; `user_id` identifies
/// the acting user for audit entries and is not part of the query scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantContext {
    /// Client account owning the flow
    pub client_id: Uuid,
    /// Engagement within the client account
    pub engagement_id: Uuid,
    /// Acting user
    pub user_id: String,
}

impl TenantContext {
    /// Create a new tenant context.
    pub fn new(client_id: Uuid, engagement_id: Uuid, user_id: impl Into<String>) -> Self {
        Self {
            client_id,
            engagement_id,
            user_id: user_id.into(),
        }
    }

    /// Same client and engagement, different acting user.
    pub fn as_user(&self, user_id: impl Into<String>) -> Self {
        Self {
            client_id: self.client_id,
            engagement_id: self.engagement_id,
            user_id: user_id.into(),
        }
    }

    /// Whether a record stamped with the given scope belongs to this tenant.
    pub fn owns(&self, client_id: Uuid, engagement_id: Uuid) -> bool {
        self.client_id == client_id && self.engagement_id == engagement_id
    }
}

impl std::fmt::Display for TenantContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.client_id, self.engagement_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owns_ignores_user() {
        let tenant = TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), "alice");
        let other_user = tenant.as_user("bob");
        assert!(other_user.owns(tenant.client_id, tenant.engagement_id));
        assert!(!tenant.owns(Uuid::new_v4(), tenant.engagement_id));
        assert!(!tenant.owns(tenant.client_id, Uuid::new_v4()));
    }
}
