use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Owner,
    Admin,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    Connect,
    Query,
    ViewSchema,
    ViewLogs,
    ListModels,
    /// Run statements that modify data
    WriteData,
}

impl Role {
    pub fn allows(&self, permission: Permission) -> bool {
        match self {
            Role::Owner => true,
            Role::Admin => !matches!(permission, Permission::WriteData),
            Role::User => matches!(permission, Permission::Query | Permission::ViewSchema),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Owner => "Owner",
            Role::Admin => "Admin",
            Role::User => "User",
        };
        f.write_str(name)
    }
}

/// Caller identity resolved from the request
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub name: String,
    pub role: Role,
}

impl Principal {
    pub fn anonymous_owner() -> Self {
        Self {
            name: "anonymous".to_string(),
            role: Role::Owner,
        }
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.role.allows(permission)
    }
}
