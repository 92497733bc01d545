use crate::error::{ApiError, ApiResult};
use crate::models::{from_millis, GroupView, Identity, MessageView};
use crate::storage::{constraint_violation, Constraint, Storage};
use chrono::Utc;
use uuid::Uuid;

/// Named groups with an append-only message log each.
#[derive(Clone)]
pub struct GroupMessaging {
    storage: Storage,
}

impl GroupMessaging {
    pub fn new(storage: Storage) -> Self {
        GroupMessaging { storage }
    }

    pub fn create_group(&self, name: &str, description: &str) -> ApiResult<Uuid> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::validation("Group name is required"));
        }

        let id = Uuid::new_v4();
        self.storage.with_conn(|conn| {
            conn.execute(
                "INSERT INTO study_groups (id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, name, description, Utc::now().timestamp_millis()),
            )
            .map_err(|e| match constraint_violation(&e) {
                Some(Constraint::Unique) => {
                    ApiError::conflict(format!("Group '{}' already exists", name))
                }
                _ => e.into(),
            })?;
            Ok(())
        })?;

        log::info!("created group {} ({})", name, id);
        Ok(id)
    }

    pub fn list_groups(&self) -> ApiResult<Vec<GroupView>> {
        self.storage.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, description FROM study_groups ORDER BY name")?;
            let groups = stmt
                .query_map([], |row| {
                    Ok(GroupView {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(groups)
        })
    }

    /// Appends a message. The group is not looked up first; an unknown
    /// group id is caught by the foreign key and reported as bad input.
    pub fn send_message(&self, identity: &Identity, group_id: Uuid, text: &str) -> ApiResult<Uuid> {
        if text.trim().is_empty() {
            return Err(ApiError::validation("Message content is required"));
        }

        let id = Uuid::new_v4();
        self.storage.with_conn(|conn| {
            conn.execute(
                "INSERT INTO group_messages (id, account_id, group_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    id,
                    identity.account_id,
                    group_id,
                    text,
                    Utc::now().timestamp_millis(),
                ),
            )
            .map_err(|e| match constraint_violation(&e) {
                Some(Constraint::ForeignKey) => ApiError::validation("Unknown group or sender"),
                _ => e.into(),
            })?;
            Ok(())
        })?;

        log::debug!("{} posted to group {}", identity.account_id, group_id);
        Ok(id)
    }

    /// Messages of one group, oldest first, with the author's username.
    pub fn list_messages(&self, group_id: Uuid) -> ApiResult<Vec<MessageView>> {
        self.storage.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.group_id, a.username, m.content, m.created_at
                 FROM group_messages m
                 JOIN accounts a ON a.id = m.account_id
                 WHERE m.group_id = ?1
                 ORDER BY m.created_at ASC, m.rowid ASC",
            )?;
            let messages = stmt
                .query_map([group_id], |row| {
                    Ok(MessageView {
                        id: row.get(0)?,
                        group_id: row.get(1)?,
                        username: row.get(2)?,
                        content: row.get(3)?,
                        created_at: from_millis(row.get(4)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
    }
}
