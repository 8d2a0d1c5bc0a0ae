//! Batch fetching over the changes client seam.

use crate::config::{FollowMode, FollowerConfig};
use crate::error::FetchError;
use crate::tracker::{Batch, FeedPosition};
use async_trait::async_trait;
use changefeed_protocol::{ChangesRequest, ChangesResponse, FeedStyle};
use std::sync::Arc;
use tracing::debug;

/// A changes client issues requests against the changes endpoint.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-memory, scripted fakes for testing, etc.).
/// Implementations issue exactly one request per call and never retry.
#[async_trait]
pub trait ChangesClient: Send + Sync {
    /// Fetches one page of changes.
    async fn fetch_changes(&self, request: &ChangesRequest) -> Result<ChangesResponse, FetchError>;
}

#[async_trait]
impl<C: ChangesClient + ?Sized> ChangesClient for Arc<C> {
    async fn fetch_changes(&self, request: &ChangesRequest) -> Result<ChangesResponse, FetchError> {
        (**self).fetch_changes(request).await
    }
}

/// Fetches the next page for a position.
///
/// Stateless apart from the client it wraps.
pub struct BatchFetcher<C: ChangesClient> {
    client: Arc<C>,
}

impl<C: ChangesClient> Clone for BatchFetcher<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
        }
    }
}

impl<C: ChangesClient> BatchFetcher<C> {
    /// Creates a fetcher over a shared client.
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    /// Builds the request for the page after `position`.
    ///
    /// The row limit is the configured batch size, lowered to what is left
    /// of the emit limit.
    pub fn request_for(&self, position: &FeedPosition, config: &FollowerConfig) -> ChangesRequest {
        let page = match position.remaining(config.limit) {
            Some(remaining) => config.batch_size.min(remaining),
            None => config.batch_size,
        };

        let request = ChangesRequest::new(config.db.clone(), position.since.clone())
            .with_limit(page)
            .with_include_docs(config.include_docs)
            .with_filter(config.filter.clone());

        match config.mode {
            FollowMode::Finite => request.with_feed(FeedStyle::Normal),
            FollowMode::Listen => request
                .with_feed(FeedStyle::LongPoll)
                .with_timeout(config.long_poll_timeout),
        }
    }

    /// Fetches one batch. Exactly one request is issued.
    pub async fn fetch(
        &self,
        position: &FeedPosition,
        config: &FollowerConfig,
    ) -> Result<Batch, FetchError> {
        let request = self.request_for(position, config);
        let response = self.client.fetch_changes(&request).await?;

        debug!(
            db = %config.db,
            since = %position.since,
            records = response.results.len(),
            pending = response.pending,
            last_seq = %response.last_seq,
            "fetched changes batch"
        );

        Ok(Batch::from(response))
    }
}
