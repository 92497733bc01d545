use crate::error::{ApiError, ApiResult};
use crate::models::{Identity, ProfileUpdate, ProfileView};
use crate::storage::Storage;
use rusqlite::OptionalExtension;

#[derive(Clone)]
pub struct ProfileManager {
    storage: Storage,
}

impl ProfileManager {
    pub fn new(storage: Storage) -> Self {
        ProfileManager { storage }
    }

    pub fn get(&self, identity: &Identity) -> ApiResult<ProfileView> {
        let profile = self.storage.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT email, full_name, phone, study_hours, specialty, hobbies, location, profile_image
                     FROM accounts WHERE id = ?1",
                    [identity.account_id],
                    |row| {
                        Ok(ProfileView {
                            email: row.get(0)?,
                            full_name: row.get(1)?,
                            phone: row.get(2)?,
                            study_hours: row.get(3)?,
                            specialty: row.get(4)?,
                            hobbies: row.get(5)?,
                            location: row.get(6)?,
                            profile_image: row.get(7)?,
                        })
                    },
                )
                .optional()?)
        })?;

        profile.ok_or_else(|| ApiError::not_found("User not found"))
    }

    /// Writes all six mutable fields. A field the caller left out is stored
    /// as an empty string, it is not kept at its previous value.
    pub fn update(&self, identity: &Identity, fields: &ProfileUpdate) -> ApiResult<()> {
        let updated = self.storage.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE accounts
                 SET full_name = ?1, phone = ?2, study_hours = ?3, specialty = ?4, hobbies = ?5, location = ?6
                 WHERE id = ?7",
                (
                    &fields.full_name,
                    &fields.phone,
                    &fields.study_hours,
                    &fields.specialty,
                    &fields.hobbies,
                    &fields.location,
                    identity.account_id,
                ),
            )?)
        })?;

        if updated == 0 {
            return Err(ApiError::not_found("User not found"));
        }
        log::debug!("profile updated for {}", identity.account_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialStore, Registration};
    use uuid::Uuid;

    fn setup() -> (ProfileManager, Identity) {
        let storage = Storage::new(":memory:", 1).unwrap();
        let credentials = CredentialStore::new(storage.clone());
        let mut registration = Registration::new("ana", "a@x.com", "pw1");
        registration.hobbies = "chess".to_string();
        credentials.register(&registration).unwrap();
        let account = credentials.verify("a@x.com", "pw1").unwrap().unwrap();
        (ProfileManager::new(storage), Identity::from(&account))
    }

    #[test]
    fn test_fresh_profile_has_empty_optional_fields() {
        let (profiles, identity) = setup();
        let profile = profiles.get(&identity).unwrap();
        assert_eq!(profile.email, "a@x.com");
        assert_eq!(profile.full_name, None);
        assert_eq!(profile.phone, None);
        assert_eq!(profile.profile_image, None);
        // Seeded at registration.
        assert_eq!(profile.hobbies.as_deref(), Some("chess"));
    }

    #[test]
    fn test_update_then_get() {
        let (profiles, identity) = setup();
        let fields = ProfileUpdate {
            full_name: "Ana Lopez".to_string(),
            phone: "555-0100".to_string(),
            study_hours: "20".to_string(),
            specialty: "Biology".to_string(),
            hobbies: "running".to_string(),
            location: "Lima".to_string(),
        };
        profiles.update(&identity, &fields).unwrap();

        let profile = profiles.get(&identity).unwrap();
        assert_eq!(profile.full_name.as_deref(), Some("Ana Lopez"));
        assert_eq!(profile.specialty.as_deref(), Some("Biology"));
        assert_eq!(profile.location.as_deref(), Some("Lima"));
    }

    #[test]
    fn test_empty_update_overwrites_every_field() {
        let (profiles, identity) = setup();
        let fields = ProfileUpdate {
            full_name: "Ana".to_string(),
            specialty: "Math".to_string(),
            ..Default::default()
        };
        profiles.update(&identity, &fields).unwrap();
        profiles.update(&identity, &ProfileUpdate::default()).unwrap();

        let profile = profiles.get(&identity).unwrap();
        for field in [
            profile.full_name,
            profile.phone,
            profile.study_hours,
            profile.specialty,
            profile.hobbies,
            profile.location,
        ] {
            assert_eq!(field.as_deref(), Some(""));
        }
    }

    #[test]
    fn test_unknown_account_is_not_found() {
        let (profiles, identity) = setup();
        let ghost = Identity {
            account_id: Uuid::new_v4(),
            ..identity
        };
        assert!(matches!(profiles.get(&ghost), Err(ApiError::NotFound(_))));
        assert!(matches!(
            profiles.update(&ghost, &ProfileUpdate::default()),
            Err(ApiError::NotFound(_))
        ));
    }
}
