use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::knowledge::KnowledgeBase;
use crate::remote::FallbackClient;

/// Shown when the remote call fails; lists what the canned answers still
/// cover so the bot stays useful with zero connectivity.
pub const DEGRADED_REPLY: &str = "I'm having trouble reaching the AI assistant right now. \
    I can still answer questions about Python, Stata, R, causal inference (DiD, IV, RDD), \
    machine learning, Git, and replicability - ask me about any of those.";

/// Shown on a knowledge-base miss when no remote endpoint is configured.
pub const REPHRASE_REPLY: &str = "I don't have a canned answer for that one. \
    Try rephrasing, or ask about Python, Stata, R, causal inference, machine learning, \
    Git, or replicability.";

const GREETING_REPLY: &str = "Hello! Welcome to ProTools ER1. I'm here to help you \
    navigate the course material. What would you like to learn about today?";

const THANKS_REPLY: &str = "You're welcome! Feel free to ask if you have more questions \
    about the course material.";

/// Where a reply came from. Serialized into log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    KnowledgeBase,
    GeminiApi,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    pub source: ReplySource,
}

/// Routes a user message: knowledge base first, then small talk, then the
/// remote fallback. Infallible by contract - every failure on the remote
/// path is recovered into a renderable degraded reply.
pub struct ResponseDispatcher {
    kb: Arc<KnowledgeBase>,
    fallback: Option<FallbackClient>,
    reply_delay: Duration,
    greeting: Regex,
    thanks: Regex,
}

impl ResponseDispatcher {
    pub fn new(
        kb: Arc<KnowledgeBase>,
        fallback: Option<FallbackClient>,
        reply_delay: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            kb,
            fallback,
            reply_delay,
            greeting: Regex::new(r"^(hi|hello|hey|good morning|good afternoon)")?,
            thanks: Regex::new(r"(thank|thanks|thx)")?,
        })
    }

    pub async fn respond(&self, message: &str) -> Reply {
        let lowered = message.to_lowercase();

        if let Some(hit) = self.kb.best_match(message) {
            tracing::debug!(question = %hit.entry.question, score = hit.score, "knowledge base hit");
            // Brief pause so canned answers don't land unnaturally fast.
            if !self.reply_delay.is_zero() {
                tokio::time::sleep(self.reply_delay).await;
            }
            return Reply {
                text: hit.entry.answer.clone(),
                source: ReplySource::KnowledgeBase,
            };
        }

        if self.greeting.is_match(&lowered) {
            return Reply {
                text: GREETING_REPLY.to_string(),
                source: ReplySource::KnowledgeBase,
            };
        }
        if self.thanks.is_match(&lowered) {
            return Reply {
                text: THANKS_REPLY.to_string(),
                source: ReplySource::KnowledgeBase,
            };
        }

        let Some(client) = &self.fallback else {
            return Reply {
                text: REPHRASE_REPLY.to_string(),
                source: ReplySource::Fallback,
            };
        };

        match client.ask(message).await {
            Ok(text) => Reply {
                text,
                source: ReplySource::GeminiApi,
            },
            Err(err) => {
                // Recovered, never surfaced as an error to the caller.
                tracing::debug!(error = %err, "fallback call failed, degrading");
                Reply {
                    text: DEGRADED_REPLY.to_string(),
                    source: ReplySource::Fallback,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dispatcher(fallback: Option<FallbackClient>) -> ResponseDispatcher {
        let kb = Arc::new(KnowledgeBase::builtin().unwrap());
        ResponseDispatcher::new(kb, fallback, Duration::ZERO).unwrap()
    }

    fn client_for(url: &str) -> FallbackClient {
        FallbackClient::new(url, Duration::from_secs(2)).unwrap()
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/chat")
    }

    async fn counting_server(status: StatusCode, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let router = Router::new().route(
            "/chat",
            post(move || {
                seen.fetch_add(1, Ordering::SeqCst);
                async move { (status, body) }
            }),
        );
        (serve(router).await, calls)
    }

    #[tokio::test]
    async fn knowledge_base_hit_makes_no_network_call() {
        let (url, calls) = counting_server(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
        let d = dispatcher(Some(client_for(&url)));

        let reply = d.respond("How do I merge two datasets?").await;
        assert_eq!(reply.source, ReplySource::KnowledgeBase);
        assert!(reply.text.contains("Merging"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn greeting_and_thanks_make_no_network_call() {
        let (url, calls) = counting_server(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
        let d = dispatcher(Some(client_for(&url)));

        let hello = d.respond("hello there").await;
        assert_eq!(hello.source, ReplySource::KnowledgeBase);
        let thanks = d.respond("ok thanks!").await;
        assert_eq!(thanks.source, ReplySource::KnowledgeBase);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remote_success_is_tagged_gemini() {
        let router = Router::new().route(
            "/chat",
            post(|| async { Json(serde_json::json!({ "reply": "from upstream" })) }),
        );
        let url = serve(router).await;
        let d = dispatcher(Some(client_for(&url)));

        let reply = d.respond("what's the weather like?").await;
        assert_eq!(reply.source, ReplySource::GeminiApi);
        assert_eq!(reply.text, "from upstream");
    }

    #[tokio::test]
    async fn http_500_degrades_to_fixed_reply() {
        let (url, _) = counting_server(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
        let d = dispatcher(Some(client_for(&url)));

        let reply = d.respond("what's the weather like?").await;
        assert_eq!(reply.source, ReplySource::Fallback);
        assert_eq!(reply.text, DEGRADED_REPLY);
    }

    #[tokio::test]
    async fn limit_reached_429_degrades_without_surfacing_proxy_reply() {
        let router = Router::new().route(
            "/chat",
            post(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(serde_json::json!({
                        "error": "limit_reached",
                        "reply": "daily limit hit, come back tomorrow"
                    })),
                )
            }),
        );
        let url = serve(router).await;
        let d = dispatcher(Some(client_for(&url)));

        let reply = d.respond("what's the weather like?").await;
        assert_eq!(reply.source, ReplySource::Fallback);
        assert_eq!(reply.text, DEGRADED_REPLY);
    }

    #[tokio::test]
    async fn malformed_body_degrades_to_fixed_reply() {
        // 200 but no `reply` field, and a second case of non-JSON.
        for body in ["{}", "not json at all"] {
            let router = Router::new().route("/chat", post(move || async move { body }));
            let url = serve(router).await;
            let d = dispatcher(Some(client_for(&url)));

            let reply = d.respond("what's the weather like?").await;
            assert_eq!(reply.source, ReplySource::Fallback);
            assert_eq!(reply.text, DEGRADED_REPLY);
        }
    }

    #[tokio::test]
    async fn hung_endpoint_degrades_after_timeout() {
        let router = Router::new().route(
            "/chat",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "too late"
            }),
        );
        let url = serve(router).await;
        let client = FallbackClient::new(&url, Duration::from_millis(200)).unwrap();
        let d = dispatcher(Some(client));

        let reply = d.respond("what's the weather like?").await;
        assert_eq!(reply.source, ReplySource::Fallback);
        assert_eq!(reply.text, DEGRADED_REPLY);
    }

    #[tokio::test]
    async fn unreachable_endpoint_degrades() {
        // Nothing is listening here.
        let d = dispatcher(Some(client_for("http://127.0.0.1:1/chat")));
        let reply = d.respond("what's the weather like?").await;
        assert_eq!(reply.source, ReplySource::Fallback);
        assert_eq!(reply.text, DEGRADED_REPLY);
    }

    #[tokio::test]
    async fn disabled_fallback_suggests_rephrasing() {
        let d = dispatcher(None);
        let reply = d.respond("what's the weather like?").await;
        assert_eq!(reply.source, ReplySource::Fallback);
        assert_eq!(reply.text, REPHRASE_REPLY);
    }
}
