//! HTTP document-store client
//!
//! Writes mirrored documents with an idempotent PUT to
//! `{base_url}/ledger/{project_id}/entries/{doc_id}`. The document id is the
//! entry's content hash, so replays overwrite the same document instead of
//! duplicating it.

use crate::{Error, MirrorDocument, MirrorStore, Result};
use async_trait::async_trait;
use std::time::Duration;

/// HTTP mirror store
#[derive(Debug, Clone)]
pub struct HttpMirror {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMirror {
    /// Default per-request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a client for a document store endpoint
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Self::DEFAULT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn document_url(&self, doc: &MirrorDocument) -> String {
        format!(
            "{}/ledger/{}/entries/{}",
            self.base_url, doc.project_id, doc.doc_id
        )
    }
}

#[async_trait]
impl MirrorStore for HttpMirror {
    async fn write_entry(&self, doc: &MirrorDocument) -> Result<()> {
        let response = self
            .client
            .put(self.document_url(doc))
            .json(doc)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Rejected {
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
