use serde::{Deserialize, Serialize};

/// Who is on the other end of a stream: an operator console or a display
/// device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Display,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Display => "display",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "display" => Ok(Self::Display),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Typed broadcast predicate. Absent fields match everything; present
/// fields combine with logical AND.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastFilter {
    pub role: Option<Role>,
    pub owner: Option<String>,
}

impl BroadcastFilter {
    /// Matches every connection.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn for_role(role: Role) -> Self {
        Self {
            role: Some(role),
            owner: None,
        }
    }

    pub fn for_owner(role: Role, owner: impl Into<String>) -> Self {
        Self {
            role: Some(role),
            owner: Some(owner.into()),
        }
    }

    /// A connection with no owner never matches an owner-bearing filter.
    pub fn matches(&self, role: Role, owner: Option<&str>) -> bool {
        if let Some(want) = self.role {
            if want != role {
                return false;
            }
        }
        if let Some(want) = self.owner.as_deref() {
            if owner != Some(want) {
                return false;
            }
        }
        true
    }
}
