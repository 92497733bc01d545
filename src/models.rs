use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A registered user. The password hash never leaves the storage layer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
}

/// What a validated token says about its bearer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Identity {
    pub account_id: Uuid,
    pub email: String,
    pub username: String,
    pub is_admin: bool,
}

impl From<&Account> for Identity {
    fn from(account: &Account) -> Self {
        Identity {
            account_id: account.id,
            email: account.email.clone(),
            username: account.username.clone(),
            is_admin: account.is_admin,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ProfileView {
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub study_hours: Option<String>,
    pub specialty: Option<String>,
    pub hobbies: Option<String>,
    pub location: Option<String>,
    pub profile_image: Option<String>,
}

/// Body of `PUT /profile`. Missing or null keys deserialize as empty strings.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ProfileUpdate {
    #[serde(deserialize_with = "lenient_text")]
    pub full_name: String,
    #[serde(deserialize_with = "lenient_text")]
    pub phone: String,
    #[serde(deserialize_with = "lenient_text")]
    pub study_hours: String,
    #[serde(deserialize_with = "lenient_text")]
    pub specialty: String,
    #[serde(deserialize_with = "lenient_text")]
    pub hobbies: String,
    #[serde(deserialize_with = "lenient_text")]
    pub location: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DocumentView {
    pub id: Uuid,
    pub filename: String,
    pub upload_date: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GroupView {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MessageView {
    pub id: Uuid,
    pub group_id: Uuid,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        ChatMessage {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Converts a stored millisecond timestamp back to UTC.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Accepts `"12"`, `12`, `12.5` or `null` where a free-form text field is expected.
pub fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(String::new()),
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {}",
            other
        ))),
    }
}
