use crate::error::{MarginError, MarginResult};
use crate::repository::{Entity, FindOptions, RecordFilter, Repository, apply_find};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Duration;

/// Repository backed by a REST-style HTTP API.
///
/// Records of `T` live under `{base_url}/{T::DOMAIN}`; partial updates are
/// sent as `PATCH` with only the patched fields, and the server is expected
/// to merge them. Every request is bounded by the client timeout.
pub struct RemoteRepository<T> {
    client: Client,
    base_url: Url,
    _records: PhantomData<fn() -> T>,
}

impl<T: Entity> RemoteRepository<T> {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> MarginResult<Self> {
        let raw = base_url.into();
        let base_url = Url::parse(&raw)
            .map_err(|e| MarginError::Validation(format!("invalid remote url '{raw}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(MarginError::Validation(format!(
                "remote url '{raw}' cannot carry a path"
            )));
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(RemoteRepository {
            client,
            base_url,
            _records: PhantomData,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// `base_url` extended by `segments`, each percent-encoded as one path
    /// segment so ids containing `/`, `?` or `#` stay inside it.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn collection_url(&self) -> Url {
        self.url(&[T::DOMAIN])
    }

    fn record_url(&self, id: &str) -> Url {
        self.url(&[T::DOMAIN, id])
    }

    async fn fetch_all(&self) -> MarginResult<Vec<T>> {
        let response = self.client.get(self.collection_url()).send().await?;
        decode(expect_success(response, T::DOMAIN).await?).await
    }
}

/// Maps non-success statuses onto the error taxonomy. Server errors count as
/// network failures so callers can fall back.
async fn expect_success(response: Response, what: &str) -> MarginResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => MarginError::NotFound(what.to_string()),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            MarginError::Validation(format!("{what}: {body}"))
        }
        s if s.is_server_error() => MarginError::Network(format!("{what}: server returned {s}")),
        s => MarginError::Storage(format!("{what}: server returned {s}")),
    })
}

async fn decode<R: DeserializeOwned>(response: Response) -> MarginResult<R> {
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl<T: Entity> Repository<T> for RemoteRepository<T> {
    fn backend_name(&self) -> &'static str {
        "remote"
    }

    async fn find_all(
        &self,
        filter: Option<&RecordFilter<T>>,
        options: &FindOptions,
    ) -> MarginResult<Vec<T>> {
        Ok(apply_find(self.fetch_all().await?, filter, options))
    }

    async fn find_by_id(&self, id: &str) -> MarginResult<Option<T>> {
        let response = self.client.get(self.record_url(id)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let what = format!("{} record '{id}'", T::DOMAIN);
        Ok(Some(decode(expect_success(response, &what).await?).await?))
    }

    async fn create(&self, mut record: T) -> MarginResult<T> {
        record.assign_id();
        record.validate()?;

        let response = self
            .client
            .post(self.collection_url())
            .json(&record)
            .send()
            .await?;
        decode(expect_success(response, T::DOMAIN).await?).await
    }

    async fn update(&self, id: &str, patch: &T::Patch) -> MarginResult<T> {
        let response = self
            .client
            .patch(self.record_url(id))
            .json(patch)
            .send()
            .await?;
        let what = format!("{} record '{id}'", T::DOMAIN);
        let updated: T = decode(expect_success(response, &what).await?).await?;
        updated.validate()?;
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> MarginResult<()> {
        let response = self.client.delete(self.record_url(id)).send().await?;
        let what = format!("{} record '{id}'", T::DOMAIN);
        expect_success(response, &what).await?;
        Ok(())
    }

    async fn count(&self) -> MarginResult<usize> {
        Ok(self.fetch_all().await?.len())
    }

    async fn exists(&self) -> MarginResult<bool> {
        let response = self.client.get(self.collection_url()).send().await?;
        match expect_success(response, T::DOMAIN).await {
            Ok(_) => Ok(true),
            Err(MarginError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn health_check(&self) -> bool {
        let url = self.url(&["health"]);
        match self.client.get(url.clone()).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "remote health check failed");
                false
            }
        }
    }
}
