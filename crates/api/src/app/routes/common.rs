use axum::http::StatusCode;

use branchstock_auth::{CommandAuthorization, Permission};

use crate::app::errors;
use crate::context::PrincipalContext;

/// Small helper wrapper to associate required permissions with an operation.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Permission>,
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

/// 403 unless the principal holds `permission`.
pub fn require(principal: &PrincipalContext, permission: Permission) -> Result<(), axum::response::Response> {
    let guard = CmdAuth {
        inner: (),
        required: vec![permission],
    };
    crate::authz::authorize_command(principal, &guard)
        .map_err(|e| errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()))
}
