use crate::Database;
use crate::models::{NewRecordRow, RecordRow};
use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use helpsl_types::Category;
use rusqlite::{Connection, Row};

const RECORD_COLUMNS: &str =
    "id, name, phone, type, location, description, latitude, longitude, created_at, status";

impl Database {
    // -- Records --

    /// Whole table, pending first, newest first within a status.
    pub fn list_records(&self, category: Category) -> Result<Vec<RecordRow>> {
        self.with_conn(|conn| query_records(conn, category))
    }

    /// Insert a row and return it as stored, with its assigned id and timestamp.
    pub fn insert_record(&self, category: Category, new: &NewRecordRow<'_>) -> Result<RecordRow> {
        self.with_conn(|conn| {
            let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
            conn.execute(
                &format!(
                    "INSERT INTO {} (name, phone, type, location, description, latitude, longitude, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    category.table()
                ),
                rusqlite::params![
                    new.name,
                    new.phone,
                    new.kind,
                    new.location,
                    new.description,
                    new.latitude,
                    new.longitude,
                    created_at,
                ],
            )?;

            let id = conn.last_insert_rowid();
            query_record(conn, category, id)?
                .ok_or_else(|| anyhow::anyhow!("{}#{} vanished after insert", category.table(), id))
        })
    }

    /// Move a request from pending to completed.
    /// Returns the current row and whether this call changed it, or `None` if
    /// the id does not exist.
    pub fn mark_request_completed(&self, id: i64) -> Result<Option<(RecordRow, bool)>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE requests SET status = 'completed' WHERE id = ?1 AND status = 'pending'",
                [id],
            )?;

            Ok(query_record(conn, Category::Request, id)?.map(|row| (row, changed > 0)))
        })
    }
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        kind: row.get(3)?,
        location: row.get(4)?,
        description: row.get(5)?,
        latitude: row.get(6)?,
        longitude: row.get(7)?,
        created_at: row.get(8)?,
        status: row.get(9)?,
    })
}

fn query_records(conn: &Connection, category: Category) -> Result<Vec<RecordRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {}
         ORDER BY CASE status WHEN 'pending' THEN 0 ELSE 1 END, created_at DESC, id DESC",
        RECORD_COLUMNS,
        category.table()
    ))?;

    let rows = stmt
        .query_map([], map_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_record(conn: &Connection, category: Category, id: i64) -> Result<Option<RecordRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} WHERE id = ?1",
        RECORD_COLUMNS,
        category.table()
    ))?;

    let row = stmt.query_row([id], map_record).optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_row<'a>(name: &'a str, kind: &'a str) -> NewRecordRow<'a> {
        NewRecordRow {
            name,
            phone: "0770000000",
            kind,
            location: "Kelaniya",
            description: "Need help",
            latitude: None,
            longitude: None,
        }
    }

    #[test]
    fn insert_assigns_ids_per_table() {
        let db = Database::open_in_memory().unwrap();

        let request = db.insert_record(Category::Request, &new_row("A", "rescue")).unwrap();
        let offer = db.insert_record(Category::Offer, &new_row("B", "boat")).unwrap();

        // Separate tables, separate id sequences.
        assert_eq!(request.id, 1);
        assert_eq!(offer.id, 1);
        assert_eq!(request.status, "pending");
        assert!(!request.created_at.is_empty());
    }

    #[test]
    fn list_puts_pending_before_completed_then_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let first = db.insert_record(Category::Request, &new_row("first", "food")).unwrap();
        let second = db.insert_record(Category::Request, &new_row("second", "food")).unwrap();
        let third = db.insert_record(Category::Request, &new_row("third", "food")).unwrap();

        db.mark_request_completed(third.id).unwrap();

        let ids: Vec<i64> = db
            .list_records(Category::Request)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id, third.id]);
    }

    #[test]
    fn completing_twice_reports_no_change() {
        let db = Database::open_in_memory().unwrap();
        let row = db.insert_record(Category::Request, &new_row("A", "shelter")).unwrap();

        let (updated, changed) = db.mark_request_completed(row.id).unwrap().unwrap();
        assert!(changed);
        assert_eq!(updated.status, "completed");

        let (again, changed) = db.mark_request_completed(row.id).unwrap().unwrap();
        assert!(!changed);
        assert_eq!(again.status, "completed");

        assert!(db.mark_request_completed(999).unwrap().is_none());
    }

    #[test]
    fn coordinates_round_trip_through_sqlite() {
        let db = Database::open_in_memory().unwrap();
        let mut new = new_row("A", "rescue");
        new.latitude = Some(6.9271);
        new.longitude = Some(79.8612);

        db.insert_record(Category::Request, &new).unwrap();
        db.insert_record(Category::Request, &new_row("B", "food")).unwrap();

        let rows = db.list_records(Category::Request).unwrap();
        let located = rows.iter().find(|r| r.name == "A").unwrap();
        assert_eq!(located.latitude, Some(6.9271));
        assert_eq!(located.longitude, Some(79.8612));
        let unlocated = rows.iter().find(|r| r.name == "B").unwrap();
        assert_eq!((unlocated.latitude, unlocated.longitude), (None, None));
    }
}
