/// Row types as read from and written to SQLite.
/// Distinct from helpsl-types wire models to keep the DB layer independent.

pub struct RecordRow {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub kind: String,
    pub location: String,
    pub description: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: String,
    pub status: String,
}

/// Column values for a new row. `id`, `status` and `created_at` are filled in
/// by the database layer.
pub struct NewRecordRow<'a> {
    pub name: &'a str,
    pub phone: &'a str,
    pub kind: &'a str,
    pub location: &'a str,
    pub description: &'a str,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}
