use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::UserId;

/// Read projection of a stored user: everything except the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserView {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(with = "crate::utils::date")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::utils::date")]
    pub updated_at: DateTime<Utc>,
}

/// Mass-assignable attributes accepted by create and update. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl UserInput {
    /// Provided attributes as a JSON map, with the password left out.
    pub fn public_attributes(&self) -> Map<String, Value> {
        let mut attributes = Map::new();
        if let Some(name) = &self.name {
            attributes.insert("name".to_string(), Value::String(name.clone()));
        }
        if let Some(email) = &self.email {
            attributes.insert("email".to_string(), Value::String(email.clone()));
        }
        attributes
    }
}

/// A validated user ready to insert. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

/// Column changes for an update. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
}
