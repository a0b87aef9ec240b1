//! Thin wrapper over the shared HTTP client.

use std::time::Duration;

use serde::ser::Serialize;

pub(crate) struct Request {
    client: reqwest::Client,
}

impl Request {
    pub(crate) fn new() -> Self {
        let client = reqwest::Client::new();
        Self { client }
    }

    pub(crate) async fn post<T>(
        &self,
        url: String,
        body: T,
    ) -> Result<reqwest::Response, reqwest::Error>
    where
        T: Serialize + Send + Sync,
    {
        self.client
            .post(&url)
            .timeout(Duration::from_secs(10))
            .header(
                "User-Agent",
                format!("zkeeper-core/{}", env!("CARGO_PKG_VERSION")),
            )
            .json(&body)
            .send()
            .await
    }
}
