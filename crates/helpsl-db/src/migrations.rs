use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS requests (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            phone       TEXT NOT NULL,
            type        TEXT NOT NULL,
            location    TEXT NOT NULL,
            description TEXT NOT NULL,
            latitude    REAL,
            longitude   REAL,
            created_at  TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'pending'
                        CHECK (status IN ('pending', 'completed'))
        );

        CREATE INDEX IF NOT EXISTS idx_requests_order
            ON requests(status, created_at);

        CREATE TABLE IF NOT EXISTS offers (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            phone       TEXT NOT NULL,
            type        TEXT NOT NULL,
            location    TEXT NOT NULL,
            description TEXT NOT NULL,
            latitude    REAL,
            longitude   REAL,
            created_at  TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'pending'
                        CHECK (status IN ('pending', 'completed'))
        );

        CREATE INDEX IF NOT EXISTS idx_offers_order
            ON offers(status, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
