use crate::error::{ApiError, ApiResult};
use crate::models::{from_millis, DocumentView, Identity};
use crate::storage::{constraint_violation, Constraint, Storage};
use chrono::Utc;
use rusqlite::OptionalExtension;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const ALLOWED_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "pdf", "docx", "txt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    ProfileImage,
    Document,
}

impl AssetKind {
    /// Name of the multipart field carrying the file.
    pub fn field_name(self) -> &'static str {
        match self {
            AssetKind::ProfileImage => "profile_image",
            AssetKind::Document => "document",
        }
    }
}

/// Uploaded files on disk plus the rows that point at them.
#[derive(Clone)]
pub struct AssetStore {
    storage: Storage,
    root: PathBuf,
}

impl AssetStore {
    pub fn new(storage: Storage, root: PathBuf) -> Self {
        AssetStore { storage, root }
    }

    /// Stores `bytes` and records it against the account. Returns the stored file name,
    /// which is unique per upload so no stored file is ever overwritten.
    pub fn upload(
        &self,
        identity: &Identity,
        kind: AssetKind,
        filename: &str,
        bytes: &[u8],
    ) -> ApiResult<String> {
        if filename.trim().is_empty() {
            return Err(ApiError::validation("No selected file"));
        }
        let clean = sanitize_filename(filename)
            .ok_or_else(|| ApiError::validation("Invalid filename"))?;
        if !allowed_file(&clean) {
            return Err(ApiError::validation("File type not allowed"));
        }

        let asset_id = Uuid::new_v4();
        let stored = format!(
            "{}_{}_{}",
            identity.account_id.simple(),
            asset_id.simple(),
            clean
        );
        fs::create_dir_all(&self.root)?;
        let path = self.root.join(&stored);
        write_new(&path, bytes)?;

        if let Err(e) = self.record(identity, kind, asset_id, &stored) {
            // The file stays behind; nothing cleans it up.
            log::warn!("upload metadata failed, orphaned file {}: {}", path.display(), e);
            return Err(e);
        }

        log::info!(
            "stored {} for {} ({} bytes)",
            stored,
            identity.account_id,
            bytes.len()
        );
        Ok(stored)
    }

    fn record(
        &self,
        identity: &Identity,
        kind: AssetKind,
        asset_id: Uuid,
        stored: &str,
    ) -> ApiResult<()> {
        match kind {
            AssetKind::ProfileImage => {
                let previous = self.storage.with_tx(|tx| {
                    let previous: Option<String> = tx
                        .query_row(
                            "SELECT profile_image FROM accounts WHERE id = ?1",
                            [identity.account_id],
                            |row| row.get(0),
                        )
                        .optional()?
                        .ok_or_else(|| ApiError::not_found("User not found"))?;
                    tx.execute(
                        "UPDATE accounts SET profile_image = ?1 WHERE id = ?2",
                        (stored, identity.account_id),
                    )?;
                    Ok(previous)
                })?;
                // The old image is no longer referenced by anything.
                if let Some(previous) = previous {
                    if let Err(e) = fs::remove_file(self.root.join(&previous)) {
                        log::warn!("could not remove replaced profile image {}: {}", previous, e);
                    }
                }
                Ok(())
            }
            AssetKind::Document => self.storage.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO documents (id, account_id, filename, upload_date) VALUES (?1, ?2, ?3, ?4)",
                    (
                        asset_id,
                        identity.account_id,
                        stored,
                        Utc::now().timestamp_millis(),
                    ),
                )
                .map_err(|e| match constraint_violation(&e) {
                    Some(Constraint::ForeignKey) => ApiError::not_found("User not found"),
                    _ => e.into(),
                })?;
                Ok(())
            }),
        }
    }

    pub fn list_documents(&self, identity: &Identity) -> ApiResult<Vec<DocumentView>> {
        self.storage.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, filename, upload_date FROM documents WHERE account_id = ?1 ORDER BY rowid",
            )?;
            let documents = stmt
                .query_map([identity.account_id], |row| {
                    Ok(DocumentView {
                        id: row.get(0)?,
                        filename: row.get(1)?,
                        upload_date: from_millis(row.get(2)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(documents)
        })
    }

    /// Reads a stored file. Only the account that uploaded it may read it;
    /// anything else looks like a missing file.
    pub fn fetch(&self, identity: &Identity, filename: &str) -> ApiResult<Vec<u8>> {
        let clean = sanitize_filename(filename)
            .filter(|clean| clean == filename)
            .ok_or_else(|| ApiError::not_found("File not found"))?;

        let owned: bool = self.storage.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM accounts WHERE id = ?1 AND profile_image = ?2)
                     OR EXISTS(SELECT 1 FROM documents WHERE account_id = ?1 AND filename = ?2)",
                (identity.account_id, &clean),
                |row| row.get(0),
            )?)
        })?;
        if !owned {
            log::debug!("{} asked for {} which it does not own", identity.account_id, clean);
            return Err(ApiError::not_found("File not found"));
        }

        match fs::read(self.root.join(&clean)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ApiError::not_found("File not found")),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_new(path: &Path, bytes: &[u8]) -> ApiResult<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    Ok(())
}

/// Reduces a client-supplied name to a safe single path component: directory
/// parts are dropped, whitespace becomes `_`, and anything outside
/// `[A-Za-z0-9._-]` is removed. Returns `None` when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(&['/', '\\'][..]).next().unwrap_or(name);
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(*c, '.' | '-' | '_'))
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

pub fn allowed_file(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

pub fn content_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialStore, Registration};
    use tempfile::TempDir;

    fn setup() -> (AssetStore, Identity, Identity, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(":memory:", 1).unwrap();
        let credentials = CredentialStore::new(storage.clone());
        credentials.register(&Registration::new("ana", "a@x.com", "pw1")).unwrap();
        credentials.register(&Registration::new("ben", "b@x.com", "pw2")).unwrap();
        let ana = credentials.verify("a@x.com", "pw1").unwrap().unwrap();
        let ben = credentials.verify("b@x.com", "pw2").unwrap().unwrap();
        let store = AssetStore::new(storage, dir.path().join("uploads"));
        (store, Identity::from(&ana), Identity::from(&ben), dir)
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("notes.txt").as_deref(), Some("notes.txt"));
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("C:\\Users\\ana\\cv.pdf").as_deref(), Some("cv.pdf"));
        assert_eq!(sanitize_filename("my holiday pic.png").as_deref(), Some("my_holiday_pic.png"));
        assert_eq!(sanitize_filename(".hidden.txt").as_deref(), Some("hidden.txt"));
        assert_eq!(sanitize_filename("résumé.pdf").as_deref(), Some("rsum.pdf"));
        assert_eq!(sanitize_filename("../.."), None);
        assert_eq!(sanitize_filename(""), None);
    }

    #[test]
    fn test_allowed_file() {
        assert!(allowed_file("a.png"));
        assert!(allowed_file("a.JPEG"));
        assert!(allowed_file("report.final.docx"));
        assert!(!allowed_file("virus.exe"));
        assert!(!allowed_file("png"));
        assert!(!allowed_file("archive.tar.gz"));
    }

    #[test]
    fn test_upload_png_and_fetch_same_bytes() {
        let (store, ana, _, _dir) = setup();
        let bytes = vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3, 255];
        let stored = store
            .upload(&ana, AssetKind::Document, "diagram.png", &bytes)
            .unwrap();
        assert!(stored.ends_with("_diagram.png"));
        assert_eq!(store.fetch(&ana, &stored).unwrap(), bytes);
    }

    #[test]
    fn test_disallowed_extension_rejected_and_nothing_written() {
        let (store, ana, _, _dir) = setup();
        let result = store.upload(&ana, AssetKind::Document, "tool.exe", b"MZ");
        assert!(matches!(result, Err(ApiError::Validation(_))));
        assert!(store.list_documents(&ana).unwrap().is_empty());
        assert!(!store.root.exists());
    }

    #[test]
    fn test_empty_filename_rejected() {
        let (store, ana, _, _dir) = setup();
        let result = store.upload(&ana, AssetKind::ProfileImage, "", b"data");
        match result {
            Err(ApiError::Validation(msg)) => assert_eq!(msg, "No selected file"),
            _ => panic!("expected validation error"),
        }
    }

    #[test]
    fn test_documents_listed_in_upload_order() {
        let (store, ana, ben, _dir) = setup();
        store.upload(&ana, AssetKind::Document, "b.txt", b"b").unwrap();
        store.upload(&ana, AssetKind::Document, "a.pdf", b"a").unwrap();
        store.upload(&ben, AssetKind::Document, "c.txt", b"c").unwrap();

        let docs = store.list_documents(&ana).unwrap();
        let names: Vec<_> = docs.iter().map(|d| d.filename.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert!(names[0].ends_with("_b.txt"));
        assert!(names[1].ends_with("_a.pdf"));
    }

    #[test]
    fn test_profile_image_updates_reference() {
        let (store, ana, _, _dir) = setup();
        let stored = store
            .upload(&ana, AssetKind::ProfileImage, "me.jpg", b"jpeg")
            .unwrap();
        let profile = crate::profile::ProfileManager::new(store.storage.clone())
            .get(&ana)
            .unwrap();
        assert_eq!(profile.profile_image, Some(stored.clone()));
        assert_eq!(store.fetch(&ana, &stored).unwrap(), b"jpeg".to_vec());
        // Profile images are not documents.
        assert!(store.list_documents(&ana).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_other_accounts_file_is_not_found() {
        let (store, ana, ben, _dir) = setup();
        let stored = store
            .upload(&ana, AssetKind::Document, "private.txt", b"secret")
            .unwrap();
        assert!(matches!(store.fetch(&ben, &stored), Err(ApiError::NotFound(_))));
        assert!(matches!(
            store.fetch(&ana, "../private.txt"),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn test_metadata_failure_leaves_file_on_disk() {
        let (store, ana, _, _dir) = setup();
        let ghost = Identity {
            account_id: Uuid::new_v4(),
            ..ana
        };
        let result = store.upload(&ghost, AssetKind::Document, "lost.txt", b"x");
        assert!(matches!(result, Err(ApiError::NotFound(_))));
        let prefix = format!("{}_", ghost.account_id.simple());
        let orphans: Vec<_> = fs::read_dir(&store.root)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(&prefix) && name.ends_with("_lost.txt"))
            .collect();
        assert_eq!(orphans.len(), 1);
    }

    #[test]
    fn test_same_name_uploads_keep_their_own_bytes() {
        let (store, ana, _, _dir) = setup();
        let first = store
            .upload(&ana, AssetKind::Document, "notes.txt", b"version one")
            .unwrap();
        let second = store
            .upload(&ana, AssetKind::Document, "notes.txt", b"version two")
            .unwrap();
        assert_ne!(first, second);
        store
            .upload(&ana, AssetKind::ProfileImage, "notes.txt", b"avatar")
            .unwrap();

        let docs = store.list_documents(&ana).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(store.fetch(&ana, &docs[0].filename).unwrap(), b"version one".to_vec());
        assert_eq!(store.fetch(&ana, &docs[1].filename).unwrap(), b"version two".to_vec());
        assert!(docs[0].filename.contains(&docs[0].id.simple().to_string()));
    }

    #[test]
    fn test_new_profile_image_replaces_the_old_one() {
        let (store, ana, _, _dir) = setup();
        let old = store
            .upload(&ana, AssetKind::ProfileImage, "me.png", b"old")
            .unwrap();
        let new = store
            .upload(&ana, AssetKind::ProfileImage, "me.png", b"new")
            .unwrap();

        assert_eq!(store.fetch(&ana, &new).unwrap(), b"new".to_vec());
        assert!(matches!(store.fetch(&ana, &old), Err(ApiError::NotFound(_))));
        assert!(!store.root.join(&old).exists());
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("x.PNG"), "image/png");
        assert_eq!(content_type("x.jpeg"), "image/jpeg");
        assert_eq!(content_type("x"), "application/octet-stream");
    }
}
