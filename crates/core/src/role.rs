use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Admin,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleProfile {
    pub role: Role,
    pub label: &'static str,
    pub can_manage_data: bool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    /// Unknown role keys get the administrator profile.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Self::User,
            _ => Self::Admin,
        }
    }

    pub fn profile(&self) -> RoleProfile {
        match self {
            Self::Admin => RoleProfile {
                role: Self::Admin,
                label: "Administrator",
                can_manage_data: true,
            },
            Self::User => RoleProfile {
                role: Self::User,
                label: "Field User",
                can_manage_data: false,
            },
        }
    }
}
