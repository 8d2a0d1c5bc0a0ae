//! A scripted changes client for testing.

use crate::error::FetchError;
use crate::fetcher::ChangesClient;
use async_trait::async_trait;
use changefeed_protocol::{ChangeRecord, ChangesRequest, ChangesResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// One scripted answer of a [`ScriptedClient`].
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Answer with a page.
    Respond(ChangesResponse),
    /// Fail with an error.
    Fail(FetchError),
    /// Never answer.
    Hang,
}

/// A changes client that replays a queued script of answers.
///
/// Every request is recorded so tests can assert on the positions the
/// follower asked for. Once the script runs out every request fails with
/// a terminal [`FetchError::Other`].
#[derive(Debug, Default)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<ScriptStep>>,
    requests: Mutex<Vec<ChangesRequest>>,
}

impl ScriptedClient {
    /// Creates a client with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client from a list of steps.
    pub fn with_script(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        let client = Self::new();
        client.script.lock().extend(steps);
        client
    }

    /// Queues an arbitrary step.
    pub fn push_step(&self, step: ScriptStep) {
        self.script.lock().push_back(step);
    }

    /// Queues a successful page.
    pub fn push_response(&self, response: ChangesResponse) {
        self.push_step(ScriptStep::Respond(response));
    }

    /// Queues a successful page built from records.
    pub fn push_batch(&self, records: Vec<ChangeRecord>, last_seq: impl Into<String>, pending: u64) {
        self.push_response(ChangesResponse::new(records, last_seq, pending));
    }

    /// Queues a failure.
    pub fn push_error(&self, error: FetchError) {
        self.push_step(ScriptStep::Fail(error));
    }

    /// Queues a request that never completes.
    pub fn push_hang(&self) {
        self.push_step(ScriptStep::Hang);
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<ChangesRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns the `since` token of every request received so far.
    pub fn since_tokens(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.since.clone()).collect()
    }

    /// Returns the number of unconsumed steps.
    pub fn remaining_steps(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl ChangesClient for ScriptedClient {
    async fn fetch_changes(&self, request: &ChangesRequest) -> Result<ChangesResponse, FetchError> {
        self.requests.lock().push(request.clone());

        let step = self.script.lock().pop_front();
        match step {
            Some(ScriptStep::Respond(response)) => Ok(response),
            Some(ScriptStep::Fail(error)) => Err(error),
            Some(ScriptStep::Hang) => std::future::pending().await,
            None => Err(FetchError::Other("script exhausted".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn replays_script_in_order() {
        let client = ScriptedClient::with_script([
            ScriptStep::Fail(FetchError::Timeout),
            ScriptStep::Respond(ChangesResponse::caught_up("3-a")),
        ]);

        let request = ChangesRequest::new("db", "0");
        assert_eq!(
            client.fetch_changes(&request).await,
            Err(FetchError::Timeout)
        );
        assert_eq!(
            client.fetch_changes(&request).await.unwrap().last_seq,
            "3-a"
        );
        assert!(matches!(
            client.fetch_changes(&request).await,
            Err(FetchError::Other(_))
        ));
        assert_eq!(client.request_count(), 3);
        assert_eq!(client.remaining_steps(), 0);
    }

    #[tokio::test]
    async fn records_requests() {
        let client = ScriptedClient::new();
        client.push_batch(vec![ChangeRecord::new("1-a", "x", "1-r")], "1-a", 0);

        client
            .fetch_changes(&ChangesRequest::new("db", "0").with_limit(5))
            .await
            .unwrap();

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].limit, Some(5));
        assert_eq!(client.since_tokens(), vec!["0".to_string()]);
    }

    #[tokio::test]
    async fn hang_never_completes() {
        let client = ScriptedClient::new();
        client.push_hang();

        let request = ChangesRequest::new("db", "0");
        let result =
            tokio::time::timeout(Duration::from_millis(20), client.fetch_changes(&request)).await;
        assert!(result.is_err());
    }
}
