//! Record persistence: the reads and writes a view needs from the backend.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use helpsl_types::api::{NewRecordRequest, RecordPayload, UpdateStatusRequest};
use helpsl_types::{Category, HelpRecord, Status};

use crate::error::PersistenceError;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Full contents of the category's table. Order is not relied upon.
    async fn query(&self, category: Category) -> Result<Vec<HelpRecord>, PersistenceError>;

    /// Create a record; the backend assigns id, timestamp and status.
    async fn insert(
        &self,
        category: Category,
        record: &NewRecordRequest,
    ) -> Result<HelpRecord, PersistenceError>;

    /// Mark a request completed and return it as stored.
    async fn complete_request(&self, id: i64) -> Result<HelpRecord, PersistenceError>;
}

/// Talks to the `/rest` endpoints of a HelpSL server.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// `base_url` is like `http://localhost:3000`.
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn table_url(&self, category: Category) -> String {
        format!("{}/rest/{}", self.base_url, category.table())
    }

    async fn read_record(
        category: Category,
        resp: reqwest::Response,
    ) -> Result<HelpRecord, PersistenceError> {
        let payload: RecordPayload = success(resp).await?.json().await?;
        HelpRecord::from_payload(category, payload)
            .map_err(|e| PersistenceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn query(&self, category: Category) -> Result<Vec<HelpRecord>, PersistenceError> {
        let url = self.table_url(category);
        debug!(url = %url, "querying {}", category.table());

        let resp = self.client.get(&url).send().await?;
        let payloads: Vec<RecordPayload> = success(resp).await?.json().await?;

        let total = payloads.len();
        let records: Vec<HelpRecord> = payloads
            .into_iter()
            .filter_map(|payload| {
                let id = payload.id;
                HelpRecord::from_payload(category, payload)
                    .map_err(|e| warn!("skipping {}#{}: {}", category.table(), id, e))
                    .ok()
            })
            .collect();

        info!(count = records.len(), skipped = total - records.len(), "loaded {}", category.table());
        Ok(records)
    }

    async fn insert(
        &self,
        category: Category,
        record: &NewRecordRequest,
    ) -> Result<HelpRecord, PersistenceError> {
        let resp = self
            .client
            .post(self.table_url(category))
            .json(record)
            .send()
            .await?;
        let created = Self::read_record(category, resp).await?;
        info!("created {}", created.key());
        Ok(created)
    }

    async fn complete_request(&self, id: i64) -> Result<HelpRecord, PersistenceError> {
        let url = format!("{}/rest/requests/{}/status", self.base_url, id);
        let resp = self
            .client
            .patch(&url)
            .json(&UpdateStatusRequest { status: Status::Completed })
            .send()
            .await?;
        Self::read_record(Category::Request, resp).await
    }
}

/// Non-2xx answers become `Rejected` carrying the response body.
async fn success(resp: reqwest::Response) -> Result<reqwest::Response, PersistenceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(PersistenceError::Rejected {
        status: status.as_u16(),
        body,
    })
}
