use crate::domain::models::Entry;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use chrono::{Duration, NaiveDate, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";
const SELECT_COLUMNS: &str =
    "SELECT id, entry_date, start_time, end_time, duration_seconds, project_code, description, notes
     FROM entries";

pub trait EntryRepository: Send + Sync {
    fn create(&self, entry: &Entry) -> Result<Entry, InfraError>;
    fn update(&self, entry: &Entry) -> Result<(), InfraError>;
    fn delete(&self, id: i64) -> Result<bool, InfraError>;
    fn get(&self, id: i64) -> Result<Option<Entry>, InfraError>;
    fn list_recent(&self, limit: usize, offset: usize) -> Result<Vec<Entry>, InfraError>;
    fn list_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Entry>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteEntryRepository {
    db_path: PathBuf,
}

impl SqliteEntryRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }
}

struct EntryRow {
    id: i64,
    date: String,
    start_time: Option<String>,
    end_time: Option<String>,
    duration_seconds: i64,
    project_code: String,
    description: String,
    notes: Option<String>,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            date: row.get(1)?,
            start_time: row.get(2)?,
            end_time: row.get(3)?,
            duration_seconds: row.get(4)?,
            project_code: row.get(5)?,
            description: row.get(6)?,
            notes: row.get(7)?,
        })
    }

    fn into_entry(self) -> Result<Entry, InfraError> {
        let date = NaiveDate::parse_from_str(&self.date, DATE_FORMAT).map_err(|error| {
            InfraError::Validation(format!(
                "invalid stored date '{}' for entry {}: {error}",
                self.date, self.id
            ))
        })?;
        Ok(Entry {
            id: Some(self.id),
            date,
            start_time: parse_stored_time(self.start_time.as_deref(), self.id)?,
            end_time: parse_stored_time(self.end_time.as_deref(), self.id)?,
            duration: Duration::seconds(self.duration_seconds),
            project_code: self.project_code,
            description: self.description,
            notes: self.notes.unwrap_or_default(),
        })
    }
}

fn parse_stored_time(value: Option<&str>, id: i64) -> Result<Option<NaiveTime>, InfraError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            NaiveTime::parse_from_str(value, TIME_FORMAT).map_err(|error| {
                InfraError::Validation(format!(
                    "invalid stored time '{value}' for entry {id}: {error}"
                ))
            })
        })
        .transpose()
}

fn format_time(value: Option<NaiveTime>) -> Option<String> {
    value.map(|time| time.format(TIME_FORMAT).to_string())
}

fn collect_entries(
    connection: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Entry>, InfraError> {
    let mut statement = connection.prepare(sql)?;
    let rows = statement
        .query_map(params, EntryRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(EntryRow::into_entry).collect()
}

impl EntryRepository for SqliteEntryRepository {
    fn create(&self, entry: &Entry) -> Result<Entry, InfraError> {
        entry.validate().map_err(InfraError::Validation)?;
        let mut connection = self.connect()?;
        let tx = connection.transaction()?;
        tx.execute(
            "INSERT INTO entries
               (entry_date, start_time, end_time, duration_seconds,
                project_code, description, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.date.format(DATE_FORMAT).to_string(),
                format_time(entry.start_time),
                format_time(entry.end_time),
                entry.duration.num_seconds(),
                entry.project_code,
                entry.description,
                entry.notes,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        let mut created = entry.clone();
        created.id = Some(id);
        Ok(created)
    }

    fn update(&self, entry: &Entry) -> Result<(), InfraError> {
        let id = entry
            .id
            .ok_or_else(|| InfraError::Validation("entry id is required for update".to_string()))?;
        entry.validate().map_err(InfraError::Validation)?;

        let mut connection = self.connect()?;
        let tx = connection.transaction()?;
        let updated = tx.execute(
            "UPDATE entries SET
               entry_date = ?1, start_time = ?2, end_time = ?3, duration_seconds = ?4,
               project_code = ?5, description = ?6, notes = ?7
             WHERE id = ?8",
            params![
                entry.date.format(DATE_FORMAT).to_string(),
                format_time(entry.start_time),
                format_time(entry.end_time),
                entry.duration.num_seconds(),
                entry.project_code,
                entry.description,
                entry.notes,
                id,
            ],
        )?;
        if updated == 0 {
            return Err(InfraError::EntryNotFound(id));
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<bool, InfraError> {
        let mut connection = self.connect()?;
        let tx = connection.transaction()?;
        let deleted = tx.execute("DELETE FROM entries WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    fn get(&self, id: i64) -> Result<Option<Entry>, InfraError> {
        let connection = self.connect()?;
        let row = connection
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                EntryRow::from_row,
            )
            .optional()?;
        row.map(EntryRow::into_entry).transpose()
    }

    fn list_recent(&self, limit: usize, offset: usize) -> Result<Vec<Entry>, InfraError> {
        let connection = self.connect()?;
        collect_entries(
            &connection,
            &format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?1 OFFSET ?2"),
            params![limit as i64, offset as i64],
        )
    }

    fn list_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Entry>, InfraError> {
        if end < start {
            return Err(InfraError::Validation(
                "range end must not be before range start".to_string(),
            ));
        }
        let connection = self.connect()?;
        collect_entries(
            &connection,
            &format!(
                "{SELECT_COLUMNS} WHERE entry_date BETWEEN ?1 AND ?2 \
                 ORDER BY entry_date DESC, id DESC"
            ),
            params![
                start.format(DATE_FORMAT).to_string(),
                end.format(DATE_FORMAT).to_string()
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;
    use tempfile::TempDir;

    fn repository() -> (TempDir, SqliteEntryRepository) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("entries.sqlite");
        initialize_database(&path).expect("init database");
        (dir, SqliteEntryRepository::new(path))
    }

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, DATE_FORMAT).expect("valid date")
    }

    fn sample_entry(day: &str, code: &str) -> Entry {
        Entry {
            id: None,
            date: date(day),
            start_time: NaiveTime::from_hms_opt(9, 0, 0),
            end_time: NaiveTime::from_hms_opt(11, 30, 0),
            duration: Duration::minutes(150),
            project_code: code.to_string(),
            description: "Review".to_string(),
            notes: String::new(),
        }
    }

    #[test]
    fn create_assigns_id_and_get_round_trips() {
        let (_dir, repo) = repository();
        let created = repo
            .create(&sample_entry("2026-02-16", "ABC"))
            .expect("create");
        let id = created.id.expect("assigned id");

        let loaded = repo.get(id).expect("get").expect("entry exists");
        assert_eq!(loaded, created);
    }

    #[test]
    fn update_changes_row_and_reports_missing() {
        let (_dir, repo) = repository();
        let mut created = repo
            .create(&sample_entry("2026-02-16", "ABC"))
            .expect("create");
        created.project_code = "XYZ".to_string();
        created.notes = "follow up".to_string();
        repo.update(&created).expect("update");

        let loaded = repo
            .get(created.id.expect("id"))
            .expect("get")
            .expect("entry");
        assert_eq!(loaded.project_code, "XYZ");
        assert_eq!(loaded.notes, "follow up");

        let mut missing = created.clone();
        missing.id = Some(9_999);
        assert!(matches!(
            repo.update(&missing),
            Err(InfraError::EntryNotFound(9_999))
        ));
    }

    #[test]
    fn create_rejects_invalid_entry() {
        let (_dir, repo) = repository();
        let mut entry = sample_entry("2026-02-16", "ABC");
        entry.duration = Duration::zero();
        assert!(matches!(
            repo.create(&entry),
            Err(InfraError::Validation(_))
        ));
    }

    #[test]
    fn delete_removes_entry() {
        let (_dir, repo) = repository();
        let created = repo
            .create(&sample_entry("2026-02-16", "ABC"))
            .expect("create");
        let id = created.id.expect("id");
        assert!(repo.delete(id).expect("delete"));
        assert!(!repo.delete(id).expect("delete again"));
        assert!(repo.get(id).expect("get").is_none());
    }

    #[test]
    fn list_recent_pages_newest_first() {
        let (_dir, repo) = repository();
        for code in ["A", "B", "C"] {
            repo.create(&sample_entry("2026-02-16", code))
                .expect("create");
        }

        let first_page = repo.list_recent(2, 0).expect("page one");
        let codes: Vec<&str> = first_page
            .iter()
            .map(|entry| entry.project_code.as_str())
            .collect();
        assert_eq!(codes, vec!["C", "B"]);

        let second_page = repo.list_recent(2, 2).expect("page two");
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].project_code, "A");
    }

    #[test]
    fn list_between_is_inclusive() {
        let (_dir, repo) = repository();
        for day in ["2026-02-14", "2026-02-15", "2026-02-16", "2026-02-17"] {
            repo.create(&sample_entry(day, "ABC")).expect("create");
        }

        let entries = repo
            .list_between(date("2026-02-15"), date("2026-02-16"))
            .expect("range");
        let days: Vec<NaiveDate> = entries.iter().map(|entry| entry.date).collect();
        assert_eq!(days, vec![date("2026-02-16"), date("2026-02-15")]);

        assert!(repo
            .list_between(date("2026-02-16"), date("2026-02-15"))
            .is_err());
    }
}
