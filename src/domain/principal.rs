use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    ApiKey,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    IssueCodes,
    RedeemCodes,
    SubmitEvents,
    ManageServices,
}

/// The authenticated caller, resolved once at the boundary and threaded down
/// explicitly. The identity provider has already verified it; the core
/// trusts it without re-validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub kind: PrincipalKind,
    pub id: String,
    pub permissions: Vec<Permission>,
}

impl Principal {
    pub fn api_key(id: &str) -> Self {
        Self {
            kind: PrincipalKind::ApiKey,
            id: id.to_string(),
            permissions: vec![
                Permission::IssueCodes,
                Permission::RedeemCodes,
                Permission::SubmitEvents,
            ],
        }
    }

    pub fn user(id: &str, permissions: Vec<Permission>) -> Self {
        Self {
            kind: PrincipalKind::User,
            id: id.to_string(),
            permissions,
        }
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_principal_defaults() {
        let p = Principal::api_key("merchant-7");
        assert_eq!(p.kind, PrincipalKind::ApiKey);
        assert!(p.can(Permission::IssueCodes));
        assert!(p.can(Permission::RedeemCodes));
        assert!(!p.can(Permission::ManageServices));
    }

    #[test]
    fn test_user_principal_carries_explicit_permissions() {
        let p = Principal::user("ops-1", vec![Permission::ManageServices]);
        assert_eq!(p.kind, PrincipalKind::User);
        assert!(p.can(Permission::ManageServices));
        assert!(!p.can(Permission::IssueCodes));
    }
}
