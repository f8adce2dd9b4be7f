use crate::domain::models::{LinkTarget, ProjectLink};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Persistent project-code to remote task/activity mapping.
///
/// Every mutation is atomic against the backing store: when it fails, the previously
/// stored state is left as it was.
pub trait MappingCache: Send + Sync {
    fn get(&self, project_code: &str) -> Result<Option<ProjectLink>, InfraError>;
    fn put(&self, project_code: &str, task: LinkTarget) -> Result<(), InfraError>;
    fn put_activity(&self, project_code: &str, activity: LinkTarget) -> Result<(), InfraError>;
    fn remove(&self, project_code: &str) -> Result<bool, InfraError>;
    fn mark_all_stale(&self) -> Result<usize, InfraError>;
    fn clear_stale(&self, project_codes: &[String]) -> Result<usize, InfraError>;
    fn list_all(&self) -> Result<Vec<ProjectLink>, InfraError>;

    fn has_stale(&self) -> Result<bool, InfraError> {
        Ok(self.list_all()?.iter().any(|link| link.stale))
    }
}

fn normalized_code(project_code: &str) -> Result<String, InfraError> {
    let normalized = project_code.trim();
    if normalized.is_empty() {
        return Err(InfraError::Validation(
            "project code must not be empty".to_string(),
        ));
    }
    Ok(normalized.to_string())
}

#[derive(Debug, Clone)]
pub struct SqliteMappingCache {
    db_path: PathBuf,
}

impl SqliteMappingCache {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }

    fn link_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectLink> {
        let task: Option<i64> = row.get(1)?;
        let activity: Option<i64> = row.get(2)?;
        let stale: i64 = row.get(3)?;
        Ok(ProjectLink {
            project_code: row.get(0)?,
            task: task.map(LinkTarget::from_raw),
            activity: activity.map(LinkTarget::from_raw),
            stale: stale != 0,
        })
    }
}

impl MappingCache for SqliteMappingCache {
    fn get(&self, project_code: &str) -> Result<Option<ProjectLink>, InfraError> {
        let Ok(project_code) = normalized_code(project_code) else {
            return Ok(None);
        };
        let connection = self.connect()?;
        let link = connection
            .query_row(
                "SELECT project_code, remote_task_id, remote_activity_id, stale
                 FROM project_links WHERE project_code = ?1",
                params![project_code],
                Self::link_from_row,
            )
            .optional()?;
        Ok(link)
    }

    fn put(&self, project_code: &str, task: LinkTarget) -> Result<(), InfraError> {
        let project_code = normalized_code(project_code)?;
        let mut connection = self.connect()?;
        let tx = connection.transaction()?;
        tx.execute(
            "INSERT INTO project_links (project_code, remote_task_id)
             VALUES (?1, ?2)
             ON CONFLICT(project_code) DO UPDATE SET
               remote_task_id = excluded.remote_task_id",
            params![project_code, task.as_raw()],
        )?;
        tx.commit()?;
        debug!(project_code = %project_code, task = task.as_raw(), "stored task link");
        Ok(())
    }

    fn put_activity(&self, project_code: &str, activity: LinkTarget) -> Result<(), InfraError> {
        let project_code = normalized_code(project_code)?;
        let mut connection = self.connect()?;
        let tx = connection.transaction()?;
        tx.execute(
            "INSERT INTO project_links (project_code, remote_activity_id)
             VALUES (?1, ?2)
             ON CONFLICT(project_code) DO UPDATE SET
               remote_activity_id = excluded.remote_activity_id",
            params![project_code, activity.as_raw()],
        )?;
        tx.commit()?;
        debug!(project_code = %project_code, activity = activity.as_raw(), "stored activity link");
        Ok(())
    }

    fn remove(&self, project_code: &str) -> Result<bool, InfraError> {
        let Ok(project_code) = normalized_code(project_code) else {
            return Ok(false);
        };
        let mut connection = self.connect()?;
        let tx = connection.transaction()?;
        let removed = tx.execute(
            "DELETE FROM project_links WHERE project_code = ?1",
            params![project_code],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn mark_all_stale(&self) -> Result<usize, InfraError> {
        let mut connection = self.connect()?;
        let tx = connection.transaction()?;
        let updated = tx.execute("UPDATE project_links SET stale = 1", [])?;
        tx.commit()?;
        Ok(updated)
    }

    fn clear_stale(&self, project_codes: &[String]) -> Result<usize, InfraError> {
        if project_codes.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; project_codes.len()].join(",");
        let sql =
            format!("UPDATE project_links SET stale = 0 WHERE project_code IN ({placeholders})");

        let mut connection = self.connect()?;
        let tx = connection.transaction()?;
        let updated = tx.execute(&sql, params_from_iter(project_codes.iter()))?;
        tx.commit()?;
        Ok(updated)
    }

    fn list_all(&self) -> Result<Vec<ProjectLink>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT project_code, remote_task_id, remote_activity_id, stale
             FROM project_links ORDER BY project_code",
        )?;
        let links = statement
            .query_map([], Self::link_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    fn has_stale(&self) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let stale: i64 = connection.query_row(
            "SELECT EXISTS(SELECT 1 FROM project_links WHERE stale = 1)",
            [],
            |row| row.get(0),
        )?;
        Ok(stale != 0)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMappingCache {
    links: Mutex<BTreeMap<String, ProjectLink>>,
}

impl InMemoryMappingCache {
    fn with_links<T>(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, ProjectLink>) -> T,
    ) -> Result<T, InfraError> {
        let mut links = self
            .links
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("mapping cache: {error}")))?;
        Ok(apply(&mut links))
    }

    fn blank_link(project_code: &str) -> ProjectLink {
        ProjectLink {
            project_code: project_code.to_string(),
            task: None,
            activity: None,
            stale: false,
        }
    }
}

impl MappingCache for InMemoryMappingCache {
    fn get(&self, project_code: &str) -> Result<Option<ProjectLink>, InfraError> {
        let Ok(project_code) = normalized_code(project_code) else {
            return Ok(None);
        };
        self.with_links(|links| links.get(&project_code).cloned())
    }

    fn put(&self, project_code: &str, task: LinkTarget) -> Result<(), InfraError> {
        let project_code = normalized_code(project_code)?;
        self.with_links(|links| {
            links
                .entry(project_code.clone())
                .or_insert_with(|| Self::blank_link(&project_code))
                .task = Some(task);
        })
    }

    fn put_activity(&self, project_code: &str, activity: LinkTarget) -> Result<(), InfraError> {
        let project_code = normalized_code(project_code)?;
        self.with_links(|links| {
            links
                .entry(project_code.clone())
                .or_insert_with(|| Self::blank_link(&project_code))
                .activity = Some(activity);
        })
    }

    fn remove(&self, project_code: &str) -> Result<bool, InfraError> {
        let Ok(project_code) = normalized_code(project_code) else {
            return Ok(false);
        };
        self.with_links(|links| links.remove(&project_code).is_some())
    }

    fn mark_all_stale(&self) -> Result<usize, InfraError> {
        self.with_links(|links| {
            links.values_mut().for_each(|link| link.stale = true);
            links.len()
        })
    }

    fn clear_stale(&self, project_codes: &[String]) -> Result<usize, InfraError> {
        self.with_links(|links| {
            let mut updated = 0;
            for code in project_codes {
                if let Some(link) = links.get_mut(code) {
                    link.stale = false;
                    updated += 1;
                }
            }
            updated
        })
    }

    fn list_all(&self) -> Result<Vec<ProjectLink>, InfraError> {
        self.with_links(|links| links.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;
    use tempfile::TempDir;

    fn sqlite_cache() -> (TempDir, SqliteMappingCache) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("links.sqlite");
        initialize_database(&path).expect("init database");
        (dir, SqliteMappingCache::new(path))
    }

    fn link_count(cache: &SqliteMappingCache, project_code: &str) -> i64 {
        cache
            .connect()
            .expect("connect")
            .query_row(
                "SELECT COUNT(*) FROM project_links WHERE project_code = ?1",
                params![project_code],
                |row| row.get(0),
            )
            .expect("count rows")
    }

    fn exercise_upsert(cache: &dyn MappingCache) {
        assert!(cache.get("ABC").expect("get").is_none());

        cache.put("ABC", LinkTarget::Remote(42)).expect("first put");
        cache.put("ABC", LinkTarget::Remote(43)).expect("second put");
        cache
            .put_activity("ABC", LinkTarget::Declined)
            .expect("put activity");

        let link = cache.get("ABC").expect("get").expect("link exists");
        assert_eq!(link.task, Some(LinkTarget::Remote(43)));
        assert_eq!(link.activity, Some(LinkTarget::Declined));
        assert!(!link.stale);
        assert_eq!(cache.list_all().expect("list").len(), 1);
    }

    fn exercise_staleness(cache: &dyn MappingCache) {
        cache.put("ABC", LinkTarget::Remote(42)).expect("put ABC");
        cache.put("XYZ", LinkTarget::Declined).expect("put XYZ");
        assert!(!cache.has_stale().expect("has stale"));

        assert_eq!(cache.mark_all_stale().expect("mark"), 2);
        assert!(cache.list_all().expect("list").iter().all(|link| link.stale));

        let cleared = cache
            .clear_stale(&["ABC".to_string(), "MISSING".to_string()])
            .expect("clear");
        assert_eq!(cleared, 1);
        assert!(!cache.get("ABC").expect("get").expect("ABC").stale);
        assert!(cache.get("XYZ").expect("get").expect("XYZ").stale);
        assert!(cache.has_stale().expect("has stale"));
        assert_eq!(cache.clear_stale(&[]).expect("clear none"), 0);
    }

    #[test]
    fn sqlite_put_upserts_on_project_code() {
        let (_dir, cache) = sqlite_cache();
        exercise_upsert(&cache);
        assert_eq!(link_count(&cache, "ABC"), 1);
    }

    #[test]
    fn in_memory_put_upserts_on_project_code() {
        exercise_upsert(&InMemoryMappingCache::default());
    }

    #[test]
    fn sqlite_stale_flags_follow_mark_and_clear() {
        let (_dir, cache) = sqlite_cache();
        exercise_staleness(&cache);
    }

    #[test]
    fn in_memory_stale_flags_follow_mark_and_clear() {
        exercise_staleness(&InMemoryMappingCache::default());
    }

    #[test]
    fn sentinel_is_stored_as_minus_one() {
        let (_dir, cache) = sqlite_cache();
        cache.put("SKIP", LinkTarget::Declined).expect("put sentinel");

        let raw: i64 = cache
            .connect()
            .expect("connect")
            .query_row(
                "SELECT remote_task_id FROM project_links WHERE project_code = 'SKIP'",
                [],
                |row| row.get(0),
            )
            .expect("raw value");
        assert_eq!(raw, -1);

        let link = cache.get("SKIP").expect("get").expect("link");
        assert!(link.is_resolved());
        assert!(link.is_declined());
    }

    #[test]
    fn activity_before_task_leaves_link_unresolved() {
        let (_dir, cache) = sqlite_cache();
        cache
            .put_activity("ABC", LinkTarget::Remote(7))
            .expect("put activity");
        let link = cache.get("ABC").expect("get").expect("link");
        assert!(!link.is_resolved());
        assert_eq!(link.activity, Some(LinkTarget::Remote(7)));
    }

    #[test]
    fn remove_reports_whether_link_existed() {
        let (_dir, cache) = sqlite_cache();
        cache.put("ABC", LinkTarget::Remote(42)).expect("put");
        assert!(cache.remove("ABC").expect("remove"));
        assert!(!cache.remove("ABC").expect("remove again"));
        assert!(cache.get("ABC").expect("get").is_none());
    }

    #[test]
    fn failed_mutation_leaves_previous_state() {
        let (_dir, cache) = sqlite_cache();
        cache.put("ABC", LinkTarget::Remote(42)).expect("put ABC");
        cache.put("XYZ", LinkTarget::Remote(7)).expect("put XYZ");

        let result = cache.put("   ", LinkTarget::Remote(1));
        assert!(matches!(result, Err(InfraError::Validation(_))));

        cache
            .connect()
            .expect("connect")
            .execute_batch(
                "CREATE TRIGGER block_xyz BEFORE UPDATE ON project_links
                 WHEN NEW.project_code = 'XYZ'
                 BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
            )
            .expect("install trigger");

        assert!(matches!(cache.mark_all_stale(), Err(InfraError::Storage(_))));
        let links = cache.list_all().expect("list");
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|link| !link.stale));
    }

    #[test]
    fn codes_are_trimmed() {
        let cache = InMemoryMappingCache::default();
        cache.put("  ABC ", LinkTarget::Remote(42)).expect("put");
        assert!(cache.get("ABC").expect("get").is_some());
    }
}
