use crate::error::{ApiError, ApiResult};
use crate::models::{lenient_text, Account};
use crate::storage::{constraint_violation, failure_message, Constraint, Storage};
use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::Deserialize;
use uuid::Uuid;

/// Body of `POST /register`. `hobbies` and `study_hours` seed the profile.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Registration {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub hobbies: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub study_hours: String,
}

impl Registration {
    pub fn new(username: &str, email: &str, password: &str) -> Self {
        Registration {
            username: Some(username.to_string()),
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct CredentialStore {
    storage: Storage,
}

impl CredentialStore {
    pub fn new(storage: Storage) -> Self {
        CredentialStore { storage }
    }

    pub fn register(&self, registration: &Registration) -> ApiResult<Uuid> {
        let username = required(&registration.username, "username")?;
        let email = required(&registration.email, "email")?;
        let password = registration
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ApiError::validation("Missing required field: password"))?;

        let password_hash = hash_password(password)?;
        let id = Uuid::new_v4();

        self.storage.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (id, username, email, password_hash, hobbies, study_hours, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                (
                    id,
                    username,
                    email,
                    &password_hash,
                    &registration.hobbies,
                    &registration.study_hours,
                    Utc::now().timestamp_millis(),
                ),
            )
            .map_err(|e| match constraint_violation(&e) {
                Some(Constraint::Unique) if failure_message(&e).contains("email") => {
                    ApiError::conflict("Email already registered")
                }
                Some(Constraint::Unique) => ApiError::conflict("Username already taken"),
                _ => e.into(),
            })?;
            Ok(())
        })?;

        log::info!("registered account {} ({})", id, username);
        Ok(id)
    }

    /// Returns the account only when `password` matches the stored hash.
    pub fn verify(&self, email: &str, password: &str) -> ApiResult<Option<Account>> {
        let row = self.storage.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, username, email, is_admin, password_hash FROM accounts WHERE email = ?1",
                    [email.trim()],
                    |row| {
                        Ok((
                            Account {
                                id: row.get(0)?,
                                username: row.get(1)?,
                                email: row.get(2)?,
                                is_admin: row.get(3)?,
                            },
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()?)
        })?;

        Ok(match row {
            Some((account, hash)) if verify_password(&hash, password) => Some(account),
            _ => None,
        })
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> ApiResult<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::validation(format!("Missing required field: {}", field))),
    }
}

fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            log::error!("stored password hash is unreadable: {}", e);
            false
        }
    }
}
