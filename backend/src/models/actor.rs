//! The authenticated caller on whose behalf changes are recorded and undone.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// Roles carried in actor tokens.
pub enum ActorRole {
    /// Regular user; may only undo their own changes.
    #[default]
    Member,
    /// Administrator; may undo others' changes when the deployment allows it.
    Admin,
}

impl ActorRole {
    /// Returns the canonical snake_case representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Member => "member",
            ActorRole::Admin => "admin",
        }
    }

    /// Parses a role name, tolerating common casings. Unknown roles fall back
    /// to `Member`.
    pub fn parse_lenient(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("admin") {
            ActorRole::Admin
        } else {
            ActorRole::Member
        }
    }
}

impl Serialize for ActorRole {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActorRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(ActorRole::parse_lenient(&s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn member(id: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Member)
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }

    /// Whether this actor may act on an entry authored by `owner`.
    pub fn may_act_for(&self, owner: &str, admin_override: bool) -> bool {
        self.id == owner || (admin_override && self.is_admin())
    }
}
