//! API-side authorization guard for ledger operations.
//!
//! This enforces authorization at the operation boundary (before the ledger
//! is touched), while keeping the domain and infra crates auth-agnostic.

use branchstock_auth::{AuthzError, CommandAuthorization, Permission, Principal, Role, authorize};

use crate::context::PrincipalContext;

/// Check authorization for an operation in the current request context.
pub fn authorize_command<C: CommandAuthorization>(principal: &PrincipalContext, command: &C) -> Result<(), AuthzError> {
    let principal = Principal {
        user_id: principal.user_id(),
        roles: principal.roles().to_vec(),
        permissions: permissions_from_roles(principal.roles()),
    };

    for perm in command.required_permissions() {
        authorize(&principal, perm)?;
    }

    Ok(())
}

/// Static role→permission policy.
///
/// Unknown roles grant nothing.
pub fn permissions_from_roles(roles: &[Role]) -> Vec<Permission> {
    if roles.contains(&Role::ADMIN) {
        return vec![Permission::ALL];
    }

    let mut perms: Vec<Permission> = Vec::new();
    let mut grant = |granted: &[Permission]| {
        for p in granted {
            if !perms.contains(p) {
                perms.push(p.clone());
            }
        }
    };

    for role in roles {
        if *role == Role::MANAGER {
            grant(&[
                Permission::STOCK_READ,
                Permission::STOCK_ADJUST,
                Permission::STOCK_INITIALIZE,
                Permission::TRANSFERS_READ,
                Permission::TRANSFERS_CREATE,
                Permission::TRANSFERS_RESOLVE,
                Permission::TRANSFERS_RETURN,
                Permission::TRANSFERS_CANCEL,
                Permission::SALES_STOCK,
            ]);
        } else if *role == Role::SELLER {
            grant(&[
                Permission::STOCK_READ,
                Permission::TRANSFERS_READ,
                Permission::TRANSFERS_CREATE,
                Permission::SALES_STOCK,
            ]);
        }
    }

    perms
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchstock_core::UserId;

    use crate::app::routes::common::CmdAuth;

    fn ctx(roles: Vec<Role>) -> PrincipalContext {
        PrincipalContext::new(UserId::new(), roles)
    }

    fn needs(perm: Permission) -> CmdAuth<()> {
        CmdAuth {
            inner: (),
            required: vec![perm],
        }
    }

    #[test]
    fn seller_cannot_resolve_transfers() {
        let seller = ctx(vec![Role::SELLER]);
        assert!(authorize_command(&seller, &needs(Permission::TRANSFERS_CREATE)).is_ok());
        assert!(authorize_command(&seller, &needs(Permission::TRANSFERS_RESOLVE)).is_err());
        assert!(authorize_command(&seller, &needs(Permission::STOCK_ADJUST)).is_err());
    }

    #[test]
    fn manager_and_admin_grants() {
        assert!(authorize_command(&ctx(vec![Role::MANAGER]), &needs(Permission::TRANSFERS_CANCEL)).is_ok());
        assert!(authorize_command(&ctx(vec![Role::ADMIN]), &needs(Permission::new("anything"))).is_ok());
        assert!(authorize_command(&ctx(vec![Role::new("viewer")]), &needs(Permission::STOCK_READ)).is_err());
    }

    #[test]
    fn overlapping_roles_do_not_duplicate_permissions() {
        let perms = permissions_from_roles(&[Role::SELLER, Role::MANAGER]);
        assert_eq!(perms.iter().filter(|p| **p == Permission::STOCK_READ).count(), 1);
    }
}
