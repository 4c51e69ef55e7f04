//! Multi-tenant partitioning.

use serde::{Deserialize, Serialize};

/// Full ownership of a stored aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tenancy {
    pub tenant_id: String,
    pub facility_id: String,
    pub warehouse_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<String>,
}

impl Tenancy {
    pub fn new(
        tenant_id: impl Into<String>,
        facility_id: impl Into<String>,
        warehouse_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            facility_id: facility_id.into(),
            warehouse_id: warehouse_id.into(),
            seller_id: None,
        }
    }

    pub fn with_seller(mut self, seller_id: impl Into<String>) -> Self {
        self.seller_id = Some(seller_id.into());
        self
    }

    /// The (tenant, facility) pair reads are filtered by.
    pub fn scope(&self) -> TenantScope {
        TenantScope::new(self.tenant_id.clone(), self.facility_id.clone())
    }
}

/// A tenant and facility pair. Every read is filtered by one of these
/// unless the caller explicitly asks for [`QueryScope::Global`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantScope {
    pub tenant_id: String,
    pub facility_id: String,
}

impl TenantScope {
    pub fn new(tenant_id: impl Into<String>, facility_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            facility_id: facility_id.into(),
        }
    }

    pub fn contains(&self, tenancy: &Tenancy) -> bool {
        self.tenant_id == tenancy.tenant_id && self.facility_id == tenancy.facility_id
    }
}

impl std::fmt::Display for TenantScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.facility_id)
    }
}

/// Scope of a repository read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryScope {
    Tenant(TenantScope),
    /// Cross-tenant read. Only background sweeps and administrative tooling
    /// should use this.
    Global,
}

impl QueryScope {
    pub fn tenant(tenant_id: impl Into<String>, facility_id: impl Into<String>) -> Self {
        QueryScope::Tenant(TenantScope::new(tenant_id, facility_id))
    }

    pub fn admits(&self, tenancy: &Tenancy) -> bool {
        match self {
            QueryScope::Tenant(scope) => scope.contains(tenancy),
            QueryScope::Global => true,
        }
    }

    /// Same check for rows that only carry a (tenant, facility) pair.
    pub fn admits_scope(&self, other: &TenantScope) -> bool {
        match self {
            QueryScope::Tenant(scope) => scope == other,
            QueryScope::Global => true,
        }
    }

    /// Returns the (tenant, facility) filter, or `None` for a global read.
    pub fn as_tenant(&self) -> Option<&TenantScope> {
        match self {
            QueryScope::Tenant(scope) => Some(scope),
            QueryScope::Global => None,
        }
    }
}

impl From<TenantScope> for QueryScope {
    fn from(scope: TenantScope) -> Self {
        QueryScope::Tenant(scope)
    }
}

impl From<&Tenancy> for QueryScope {
    fn from(tenancy: &Tenancy) -> Self {
        QueryScope::Tenant(tenancy.scope())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_scope_matches_tenant_and_facility_only() {
        let a = Tenancy::new("T1", "F1", "W1");
        let same_facility_other_warehouse = Tenancy::new("T1", "F1", "W2");
        let other_tenant = Tenancy::new("T2", "F1", "W1");

        let scope = a.scope();
        assert!(scope.contains(&a));
        assert!(scope.contains(&same_facility_other_warehouse));
        assert!(!scope.contains(&other_tenant));
    }

    #[test]
    fn global_scope_admits_everything() {
        let t = Tenancy::new("T9", "F9", "W9").with_seller("S1");
        assert!(QueryScope::Global.admits(&t));
        assert!(!QueryScope::tenant("T1", "F1").admits(&t));
        assert!(QueryScope::Global.as_tenant().is_none());
    }

    #[test]
    fn seller_is_omitted_when_absent() {
        let json = serde_json::to_value(Tenancy::new("T1", "F1", "W1")).unwrap();
        assert!(json.get("seller_id").is_none());
    }
}
