use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Stop before the upstream free tier runs out.
pub const DAILY_LIMIT: u32 = 99_000;

const LIMIT_REPLY: &str = "The AI assistant has reached its daily limit. Please try again \
    tomorrow, or use the knowledge base for common questions about the course!";

const EMPTY_REPLY: &str = "Sorry, I couldn't generate a response. Please try again.";

const SYSTEM_PROMPT: &str = "You are a helpful teaching assistant for ProTools ER1, an \
    economics programming course covering Python, Stata and R, data harnessing and cleaning, \
    causal inference (DiD, IV, RDD), estimation, replicability, Git, and machine learning. \
    Give concise, practical answers, include code examples when relevant, and point students \
    to specific modules when appropriate.";

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct ChatReply {
    reply: String,
}

#[derive(Serialize)]
struct ChatError {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<&'static str>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

/// Shared proxy state: one request counter per UTC day. A slot is reserved
/// under the lock before the upstream call and handed back if the call
/// fails, so concurrent requests cannot push past the ceiling.
pub struct ProxyState {
    client: reqwest::Client,
    upstream_url: String,
    api_key: String,
    limit: u32,
    counter: Mutex<HashMap<String, u32>>,
}

impl ProxyState {
    pub fn new(upstream_url: String, api_key: String, limit: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            upstream_url,
            api_key,
            limit,
            counter: Mutex::new(HashMap::new()),
        }
    }

    fn today_key() -> String {
        format!("requests_{}", Utc::now().format("%Y-%m-%d"))
    }

    fn current_count(&self) -> u32 {
        let counter = self.counter.lock().expect("counter lock poisoned");
        counter.get(&Self::today_key()).copied().unwrap_or(0)
    }

    /// Check the ceiling and claim a slot in one critical section.
    fn try_reserve(&self) -> bool {
        let key = Self::today_key();
        let mut counter = self.counter.lock().expect("counter lock poisoned");
        // Old day keys never get read again.
        counter.retain(|k, _| *k == key);
        let count = counter.entry(key).or_insert(0);
        if *count >= self.limit {
            return false;
        }
        *count += 1;
        true
    }

    /// Hand a reserved slot back after a failed upstream call.
    fn release(&self) {
        let mut counter = self.counter.lock().expect("counter lock poisoned");
        if let Some(count) = counter.get_mut(&Self::today_key()) {
            *count = count.saturating_sub(1);
        }
    }
}

pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new().route("/chat", post(handle_chat)).with_state(state)
}

pub async fn serve(addr: SocketAddr, state: Arc<ProxyState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "fallback proxy listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn handle_chat(
    State(state): State<Arc<ProxyState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, (StatusCode, Json<ChatError>)> {
    if request.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ChatError {
                error: "no_message",
                reply: None,
            }),
        ));
    }

    if !state.try_reserve() {
        tracing::warn!(limit = state.limit, "daily request limit reached");
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(ChatError {
                error: "limit_reached",
                reply: Some(LIMIT_REPLY),
            }),
        ));
    }

    let reply = call_upstream(&state, &request.message).await.map_err(|err| {
        tracing::error!(error = %err, "upstream call failed");
        state.release();
        (
            StatusCode::BAD_GATEWAY,
            Json(ChatError {
                error: "upstream_error",
                reply: None,
            }),
        )
    })?;

    Ok(Json(ChatReply { reply }))
}

async fn call_upstream(state: &ProxyState, message: &str) -> anyhow::Result<String> {
    let body = serde_json::json!({
        "contents": [{ "parts": [{ "text": message }] }],
        "systemInstruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
        "generationConfig": { "temperature": 0.7, "maxOutputTokens": 1024 },
    });

    let response = state
        .client
        .post(&state.upstream_url)
        .query(&[("key", state.api_key.as_str())])
        .json(&body)
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("upstream returned status {}", response.status());
    }

    let parsed: GeminiResponse = response.json().await?;
    let reply = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content.parts.into_iter().next())
        .map(|p| p.text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| EMPTY_REPLY.to_string());
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post as post_route;

    async fn serve_router(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    async fn fake_upstream(reply_text: &'static str) -> SocketAddr {
        let router = Router::new().route(
            "/generate",
            post_route(move || async move {
                Json(serde_json::json!({
                    "candidates": [
                        { "content": { "parts": [{ "text": reply_text }] } }
                    ]
                }))
            }),
        );
        serve_router(router).await
    }

    async fn proxy_with(upstream: SocketAddr, limit: u32) -> String {
        let state = Arc::new(ProxyState::new(
            format!("http://{upstream}/generate"),
            "test-key".to_string(),
            limit,
        ));
        let addr = serve_router(router(state)).await;
        format!("http://{addr}/chat")
    }

    #[tokio::test]
    async fn forwards_message_and_returns_reply() {
        let upstream = fake_upstream("upstream says hi").await;
        let url = proxy_with(upstream, 10).await;

        let response = reqwest::Client::new()
            .post(&url)
            .json(&serde_json::json!({ "message": "hello" }))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["reply"], "upstream says hi");
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let upstream = fake_upstream("unused").await;
        let url = proxy_with(upstream, 10).await;

        let response = reqwest::Client::new()
            .post(&url)
            .json(&serde_json::json!({ "message": "  " }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn ceiling_returns_limit_reached() {
        let upstream = fake_upstream("ok").await;
        let url = proxy_with(upstream, 2).await;
        let client = reqwest::Client::new();

        for _ in 0..2 {
            let ok = client
                .post(&url)
                .json(&serde_json::json!({ "message": "q" }))
                .send()
                .await
                .unwrap();
            assert!(ok.status().is_success());
        }

        let limited = client
            .post(&url)
            .json(&serde_json::json!({ "message": "q" }))
            .send()
            .await
            .unwrap();
        assert_eq!(limited.status().as_u16(), 429);
        let body: serde_json::Value = limited.json().await.unwrap();
        assert_eq!(body["error"], "limit_reached");
        assert!(body["reply"].as_str().unwrap().contains("daily limit"));
    }

    #[tokio::test]
    async fn upstream_failure_does_not_consume_the_counter() {
        let broken = Router::new().route(
            "/generate",
            post_route(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let broken_addr = serve_router(broken).await;

        let state = Arc::new(ProxyState::new(
            format!("http://{broken_addr}/generate"),
            "test-key".to_string(),
            5,
        ));
        let addr = serve_router(router(state.clone())).await;
        let url = format!("http://{addr}/chat");

        let response = reqwest::Client::new()
            .post(&url)
            .json(&serde_json::json!({ "message": "q" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 502);
        assert_eq!(state.current_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_requests_cannot_overshoot_the_ceiling() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let upstream_hits = hits.clone();
        let slow = Router::new().route(
            "/generate",
            post_route(move || {
                let hits = upstream_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    Json(serde_json::json!({
                        "candidates": [
                            { "content": { "parts": [{ "text": "slow" }] } }
                        ]
                    }))
                }
            }),
        );
        let upstream = serve_router(slow).await;
        let url = proxy_with(upstream, 1).await;
        let client = reqwest::Client::new();

        let send = |client: reqwest::Client, url: String| async move {
            client
                .post(&url)
                .json(&serde_json::json!({ "message": "q" }))
                .send()
                .await
                .unwrap()
                .status()
                .as_u16()
        };
        let (first, second) =
            tokio::join!(send(client.clone(), url.clone()), send(client, url));

        let mut statuses = [first, second];
        statuses.sort_unstable();
        assert_eq!(statuses, [200, 429]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
