use std::sync::PoisonError;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info, warn};

use helpsl_db::models::{NewRecordRow, RecordRow};
use helpsl_types::api::{NewRecordRequest, RecordPayload, UpdateStatusRequest};
use helpsl_types::{Category, ChangeEvent, Coordinates, HelpKind, HelpRecord, Status};

use crate::state::AppState;

fn category_from_path(table: &str) -> Result<Category, StatusCode> {
    Category::from_table(table).map_err(|_| StatusCode::NOT_FOUND)
}

pub async fn list_records(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let category = category_from_path(&table)?;

    // Run blocking DB query off the async runtime
    let db = state.clone();
    let rows = tokio::task::spawn_blocking(move || db.db.list_records(category))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("listing {} failed: {}", category.table(), e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let payloads: Vec<RecordPayload> = rows.into_iter().map(row_to_payload).collect();
    Ok(Json(payloads))
}

pub async fn create_record(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(req): Json<NewRecordRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let category = category_from_path(&table)?;
    validate_new_record(category, &req)?;

    let db = state.clone();
    let record = tokio::task::spawn_blocking(move || {
        let _writer = db.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let row = db
            .db
            .insert_record(
                category,
                &NewRecordRow {
                    name: req.name.trim(),
                    phone: req.phone.trim(),
                    kind: &req.kind,
                    location: req.location.trim(),
                    description: req.description.trim(),
                    latitude: req.latitude,
                    longitude: req.longitude,
                },
            )
            .map_err(|e| {
                error!("insert into {} failed: {}", category.table(), e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;

        let record = to_record(category, row)?;
        db.dispatcher.broadcast(&ChangeEvent::insert(record.clone()));
        Ok::<_, StatusCode>(record)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    info!("{} created", record.key());
    let payload = record.to_payload();

    Ok((StatusCode::CREATED, Json(payload)))
}

/// Requests only move forward, to `completed`. Completing an already completed
/// request answers with the current row and publishes nothing.
pub async fn update_request_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.status != Status::Completed {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.clone();
    let (record, changed) = tokio::task::spawn_blocking(move || {
        let _writer = db.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let (row, changed) = db
            .db
            .mark_request_completed(id)
            .map_err(|e| {
                error!("completing requests#{} failed: {}", id, e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .ok_or(StatusCode::NOT_FOUND)?;

        let record = to_record(Category::Request, row)?;
        if changed {
            db.dispatcher.broadcast(&ChangeEvent::update(record.clone()));
        }
        Ok::<_, StatusCode>((record, changed))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    if changed {
        info!("{} completed", record.key());
    }

    let payload = record.to_payload();
    Ok(Json(payload))
}

fn validate_new_record(category: Category, req: &NewRecordRequest) -> Result<(), StatusCode> {
    let required = [&req.name, &req.phone, &req.location, &req.description];
    if required.iter().any(|field| field.trim().is_empty()) {
        return Err(StatusCode::BAD_REQUEST);
    }

    HelpKind::parse(category, &req.kind).map_err(|_| StatusCode::BAD_REQUEST)?;
    Coordinates::from_parts(req.latitude, req.longitude).map_err(|_| StatusCode::BAD_REQUEST)?;

    Ok(())
}

fn to_record(category: Category, row: RecordRow) -> Result<HelpRecord, StatusCode> {
    let id = row.id;
    HelpRecord::from_payload(category, row_to_payload(row)).map_err(|e| {
        error!("{}#{} is not a valid record: {}", category.table(), id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

fn row_to_payload(row: RecordRow) -> RecordPayload {
    let created_at = row
        .created_at
        .parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // Rows written by hand through sqlite3 use "YYYY-MM-DD HH:MM:SS" without timezone.
            chrono::NaiveDateTime::parse_from_str(&row.created_at, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on record {}: {}", row.created_at, row.id, e);
            chrono::DateTime::default()
        });

    let status = row.status.parse::<Status>().unwrap_or_else(|e| {
        warn!("Corrupt status on record {}: {}", row.id, e);
        Status::Pending
    });

    RecordPayload {
        id: row.id,
        name: row.name,
        phone: row.phone,
        kind: row.kind,
        location: row.location,
        description: row.description,
        latitude: row.latitude,
        longitude: row.longitude,
        created_at,
        status,
    }
}
