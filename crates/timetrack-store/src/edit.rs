//! Read-modify-write helpers on top of [`DocumentStore`]

use timetrack_api::Session;
use timetrack_util::{ClientId, UserId};
use tracing::debug;

use crate::{DocumentStore, SaveOutcome, StoreResult};

/// Replace only the in-progress session of a user's document.
///
/// Each attempt loads the newest document and saves it back against the
/// version it was read at, so concurrent edits to sessions and projects are
/// never overwritten. Gives up after `attempts` lost races and returns the
/// last conflict. A busy lock is returned immediately.
pub async fn replace_current_session(
    store: &dyn DocumentStore,
    user: &UserId,
    client: &ClientId,
    session: Option<Session>,
    attempts: u32,
) -> StoreResult<SaveOutcome> {
    let mut last = SaveOutcome::Busy;

    for attempt in 1..=attempts.max(1) {
        let current = store.load(user).await?;
        let mut document = current.document;
        document.current_session = session.clone();

        last = store
            .save(user, document, client, Some(current.version))
            .await?;

        match &last {
            SaveOutcome::Conflict { version, .. } => {
                debug!(user_id = %user, attempt, version, "Current session update raced another writer");
            }
            _ => break,
        }
    }

    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileStore, StoreSettings};
    use tempfile::tempdir;
    use timetrack_api::{Document, Project};

    #[tokio::test]
    async fn test_replace_keeps_other_fields() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), StoreSettings::default()).unwrap();
        let user = UserId::parse("u1").unwrap();
        let client = ClientId::parse("c1").unwrap();

        let mut doc = Document::starter();
        doc.upsert_project(Project::new("Reading", "#123456"));
        store.save(&user, doc.clone(), &client, Some(0)).await.unwrap();

        let running = Session::start("Reading", "", timetrack_util::now());
        let outcome = replace_current_session(&store, &user, &client, Some(running.clone()), 3)
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Saved { version: 2 });

        let loaded = store.load(&user).await.unwrap();
        assert_eq!(loaded.document.projects, doc.projects);
        assert_eq!(loaded.document.current_session, Some(running));

        let outcome = replace_current_session(&store, &user, &client, None, 3)
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Saved { version: 3 });
        assert!(store.load(&user).await.unwrap().document.current_session.is_none());
    }
}
