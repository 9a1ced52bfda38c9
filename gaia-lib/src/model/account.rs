use std::collections::BTreeSet;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::values::ObjId;

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player,
    Builder,
    Wizard,
    Admin,
}

pub type RoleSet = BTreeSet<Role>;

/// A durable account. Lives in its own collection, never referenced from
/// world objects except by the reverse character link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub email: String,
    pub login: String,
    pub password_hash: String,
    pub display_name: String,
    #[serde(default)]
    pub character_ids: Vec<ObjId>,
    #[serde(default)]
    pub roles: RoleSet,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(login: &str, password: &str, email: &str) -> Result<Self, anyhow::Error> {
        Ok(Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            email: email.to_string(),
            login: login.to_string(),
            password_hash: hash_password(password)?,
            display_name: login.to_string(),
            character_ids: Vec::new(),
            roles: BTreeSet::from([Role::Player]),
            created: Utc::now(),
            last_login: None,
        })
    }

    pub fn verify_password(&self, password: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.password_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    pub fn set_password(&mut self, password: &str) -> Result<(), anyhow::Error> {
        self.password_hash = hash_password(password)?;
        Ok(())
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }
}

fn hash_password(password: &str) -> Result<String, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

/// Role checks used by builtins and handlers. Builder and above may shape the
/// world; wizard and above may destroy other people's objects; admin gets the
/// operator surface.
pub fn can_build(roles: &RoleSet) -> bool {
    roles.contains(&Role::Builder) || roles.contains(&Role::Wizard) || roles.contains(&Role::Admin)
}

pub fn can_wizard(roles: &RoleSet) -> bool {
    roles.contains(&Role::Wizard) || roles.contains(&Role::Admin)
}

pub fn is_admin(roles: &RoleSet) -> bool {
    roles.contains(&Role::Admin)
}
