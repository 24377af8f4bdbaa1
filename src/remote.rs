use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct FallbackRequest {
    message: String,
}

#[derive(Deserialize)]
struct FallbackResponse {
    reply: String,
}

/// Client for the remote fallback endpoint: `POST {message}` in,
/// `{reply}` out. Anything else - non-2xx status (including the proxy's
/// 429 daily-limit response), timeout, or a body missing `reply` - comes
/// back as an error for the dispatcher to recover from.
#[derive(Clone)]
pub struct FallbackClient {
    client: Client,
    endpoint: String,
}

impl FallbackClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        // The original widget awaited the fetch with no deadline; a hung
        // endpoint would leave the reply pending forever. Cap it here.
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub async fn ask(&self, message: &str) -> Result<String> {
        let request = FallbackRequest {
            message: message.to_string(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "fallback endpoint returned status {}",
                response.status()
            ));
        }

        let body: FallbackResponse = response.json().await?;
        Ok(body.reply)
    }
}
