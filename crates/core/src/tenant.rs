//! Tenant model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::{ConnectionId, TenantId};
use crate::source::Source;

/// A tenant and the connection ids registered for its sources.
///
/// Loaded once per run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    tenant_id: TenantId,
    connections: BTreeMap<Source, ConnectionId>,
}

impl Tenant {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            connections: BTreeMap::new(),
        }
    }

    /// Register a connection for `source`, replacing any previous one.
    pub fn with_connection(mut self, source: Source, connection_id: ConnectionId) -> Self {
        self.connections.insert(source, connection_id);
        self
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn connection_for(&self, source: Source) -> Option<&ConnectionId> {
        self.connections.get(&source)
    }

    pub fn connections(&self) -> &BTreeMap<Source, ConnectionId> {
        &self.connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_lookup() {
        let tenant = Tenant::new(TenantId::new("acme").unwrap())
            .with_connection(Source::Shopify, ConnectionId::new("conn-s").unwrap());

        assert_eq!(
            tenant.connection_for(Source::Shopify).map(|c| c.as_str()),
            Some("conn-s")
        );
        assert!(tenant.connection_for(Source::Quickbooks).is_none());
    }
}
