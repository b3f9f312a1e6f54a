//! Operator authorization: "is this address a currently registered operator".

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::RwLock;
use tally_core::OperatorAddress;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthorizerError {
    #[error("operator registry unavailable: {0}")]
    Unavailable(String),
}

/// Answers whether an address is a registered operator as of current state.
#[async_trait]
pub trait OperatorAuthorizer: Send + Sync {
    async fn is_authorized(&self, address: &OperatorAddress) -> Result<bool, AuthorizerError>;
}

/// Authorizer backed by a fixed, locally configured set of operators.
#[derive(Debug, Default)]
pub struct StaticAllowlist {
    operators: RwLock<HashSet<OperatorAddress>>,
}

impl StaticAllowlist {
    pub fn new(operators: impl IntoIterator<Item = OperatorAddress>) -> Self {
        Self {
            operators: RwLock::new(operators.into_iter().collect()),
        }
    }

    pub fn insert(&self, operator: OperatorAddress) -> bool {
        self.operators.write().insert(operator)
    }

    pub fn remove(&self, operator: &OperatorAddress) -> bool {
        self.operators.write().remove(operator)
    }

    pub fn len(&self) -> usize {
        self.operators.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.read().is_empty()
    }
}

#[async_trait]
impl OperatorAuthorizer for StaticAllowlist {
    async fn is_authorized(&self, address: &OperatorAddress) -> Result<bool, AuthorizerError> {
        Ok(self.operators.read().contains(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::ADDRESS_LEN;

    #[tokio::test]
    async fn allowlist_membership() {
        let a = OperatorAddress::from_bytes(&[1u8; ADDRESS_LEN]);
        let b = OperatorAddress::from_bytes(&[2u8; ADDRESS_LEN]);
        let list = StaticAllowlist::new([a.clone()]);

        assert!(list.is_authorized(&a).await.unwrap());
        assert!(!list.is_authorized(&b).await.unwrap());

        assert!(list.insert(b.clone()));
        assert!(list.is_authorized(&b).await.unwrap());
        assert!(list.remove(&a));
        assert!(!list.is_authorized(&a).await.unwrap());
        assert_eq!(list.len(), 1);
    }
}
