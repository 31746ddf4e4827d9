use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// UUIDv7 — time-sortable, so logs and indices naturally order by creation.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_newtype!(TenantId);
uuid_newtype!(AgentId);
uuid_newtype!(UserId);
uuid_newtype!(ConversationId);
uuid_newtype!(TurnId);

/// Media-plane room name. Not a UUID: callers may supply one explicitly
/// (`room_name?` on the trigger request), so this is a validated string,
/// not a generated identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomName(pub String);

impl RoomName {
    /// `"{prefix}_{agent_slug}_{ts}_{nonce}"`, nonce >= 64 bits of entropy.
    pub fn generate(prefix: &str, agent_slug: &str) -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let nonce: u64 = rand_nonce();
        Self(format!("{prefix}_{agent_slug}_{ts}_{nonce:016x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RoomName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

fn rand_nonce() -> u64 {
    use std::hash::{Hash, Hasher};
    // Not security-sensitive (display/collapse key only); avoids pulling
    // a second RNG dependency into relay-core for one nonce.
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    Uuid::new_v4().hash(&mut hasher);
    hasher.finish()
}

/// Conversation delivery mode — the two trigger-request modes from §2,
/// not a literal chat-platform channel list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Voice,
    Text,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Voice => write!(f, "voice"),
            Mode::Text => write!(f, "text"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_name_includes_prefix_and_slug() {
        let r = RoomName::generate("relay", "ada");
        assert!(r.as_str().starts_with("relay_ada_"));
    }

    #[test]
    fn uuid_newtype_roundtrips_through_string() {
        let id = TenantId::new();
        let s = id.to_string();
        let parsed: TenantId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn mode_display_matches_wire_values() {
        assert_eq!(Mode::Voice.to_string(), "voice");
        assert_eq!(Mode::Text.to_string(), "text");
    }
}
