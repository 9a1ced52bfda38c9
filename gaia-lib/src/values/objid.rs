use std::fmt::{Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize};

/// Identity of a world object. Free-form: either a human-chosen name
/// (`#door`, `#ns:door`) or a server-minted unique string. Stored without the
/// leading `#` sigil; `Display` adds it back. Deserialization accepts either
/// form.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct ObjId(String);

impl<'de> Deserialize<'de> for ObjId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ObjId::new(raw))
    }
}

impl ObjId {
    pub fn new<S: Into<String>>(s: S) -> Self {
        let s = s.into();
        match s.strip_prefix('#') {
            Some(rest) => ObjId(rest.to_string()),
            None => ObjId(s),
        }
    }

    /// Mints a fresh, globally unique ID.
    pub fn mint() -> Self {
        ObjId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace component, if the ID carries one (`ns:name`).
    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once(':').map(|(ns, _)| ns)
    }
}

impl Display for ObjId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<&str> for ObjId {
    fn from(s: &str) -> Self {
        ObjId::new(s)
    }
}

/// The root of the inheritance graph; the only object with no parents.
pub const ROOT_OBJECT: &str = "object";
/// Parent of characters and transient session users.
pub const USER_OBJECT: &str = "user";
/// Global command dispatch object, the last stop in the binder search order.
pub const COMMANDS_OBJECT: &str = "commands";
/// Runtime tunables readable by G live here as attributes.
pub const CONFIG_OBJECT: &str = "config";

pub fn root_object() -> ObjId {
    ObjId::new(ROOT_OBJECT)
}

pub fn user_object() -> ObjId {
    ObjId::new(USER_OBJECT)
}

pub fn commands_object() -> ObjId {
    ObjId::new(COMMANDS_OBJECT)
}

pub fn config_object() -> ObjId {
    ObjId::new(CONFIG_OBJECT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigil_stripped_and_displayed() {
        let id = ObjId::new("#door");
        assert_eq!(id.as_str(), "door");
        assert_eq!(id.to_string(), "#door");
        assert_eq!(id, ObjId::new("door"));
    }

    #[test]
    fn test_namespace() {
        assert_eq!(ObjId::new("#sys:config").namespace(), Some("sys"));
        assert_eq!(ObjId::new("#door").namespace(), None);
    }

    #[test]
    fn test_minted_ids_unique() {
        assert_ne!(ObjId::mint(), ObjId::mint());
    }

    #[test]
    fn test_deserialization_accepts_both_forms() {
        let with_sigil: ObjId = serde_json::from_str("\"#door\"").unwrap();
        let without: ObjId = serde_json::from_str("\"door\"").unwrap();
        assert_eq!(with_sigil, without);
        assert_eq!(serde_json::to_string(&with_sigil).unwrap(), "\"door\"");
    }
}
