//! Role directory.
//!
//! Maps addresses to capability roles. Every administrative mutation of the core
//! (threshold changes, invalidations, the admin-check toggle) and every protocol keeper
//! entry point checks a role here first.

use crate::{Address, ConstellationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Governance/administration: role management and parameter changes.
    Admin,
    /// Off-protocol server whose signature authorizes validator admission.
    AdminServer,
    /// Protocol keeper: lifecycle callbacks and rebalancing passes.
    Protocol,
}

#[derive(Clone, Debug, Default)]
pub struct Directory {
    roles: HashMap<Address, BTreeSet<Role>>,
}

impl Directory {
    /// Create a directory whose only member is `admin` holding [`Role::Admin`].
    pub fn new(admin: Address) -> Self {
        let mut roles = HashMap::new();
        roles.insert(admin, BTreeSet::from([Role::Admin]));
        Self { roles }
    }

    pub fn has_role(&self, who: &Address, role: Role) -> bool {
        self.roles
            .get(who)
            .map(|set| set.contains(&role))
            .unwrap_or(false)
    }

    pub fn require_role(&self, who: &Address, role: Role) -> Result<()> {
        if self.has_role(who, role) {
            Ok(())
        } else {
            Err(ConstellationError::Unauthorized { caller: *who, role })
        }
    }

    pub fn grant_role(&mut self, caller: &Address, who: Address, role: Role) -> Result<()> {
        self.require_role(caller, Role::Admin)?;
        self.roles.entry(who).or_default().insert(role);
        info!(%who, ?role, "Role granted");
        Ok(())
    }

    /// Revoke `role` from `who`. The last admin cannot be removed.
    pub fn revoke_role(&mut self, caller: &Address, who: &Address, role: Role) -> Result<()> {
        self.require_role(caller, Role::Admin)?;
        if role == Role::Admin && self.members(Role::Admin) == vec![*who] {
            return Err(ConstellationError::InvalidInput(
                "cannot revoke the last admin".into(),
            ));
        }
        if let Some(set) = self.roles.get_mut(who) {
            set.remove(&role);
            if set.is_empty() {
                self.roles.remove(who);
            }
        }
        info!(%who, ?role, "Role revoked");
        Ok(())
    }

    /// Members holding `role`, in address order.
    pub fn members(&self, role: Role) -> Vec<Address> {
        let mut out: Vec<Address> = self
            .roles
            .iter()
            .filter(|(_, set)| set.contains(&role))
            .map(|(addr, _)| *addr)
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    #[test]
    fn admin_can_grant_and_revoke() {
        let mut dir = Directory::new(addr(1));
        dir.grant_role(&addr(1), addr(2), Role::AdminServer).unwrap();
        assert!(dir.has_role(&addr(2), Role::AdminServer));

        dir.revoke_role(&addr(1), &addr(2), Role::AdminServer).unwrap();
        assert!(!dir.has_role(&addr(2), Role::AdminServer));
    }

    #[test]
    fn non_admin_cannot_grant() {
        let mut dir = Directory::new(addr(1));
        let err = dir.grant_role(&addr(2), addr(2), Role::Admin).unwrap_err();
        assert_eq!(
            err,
            ConstellationError::Unauthorized {
                caller: addr(2),
                role: Role::Admin
            }
        );
    }

    #[test]
    fn last_admin_cannot_be_revoked() {
        let mut dir = Directory::new(addr(1));
        assert!(dir.revoke_role(&addr(1), &addr(1), Role::Admin).is_err());

        dir.grant_role(&addr(1), addr(2), Role::Admin).unwrap();
        dir.revoke_role(&addr(2), &addr(1), Role::Admin).unwrap();
        assert_eq!(dir.members(Role::Admin), vec![addr(2)]);
    }
}
