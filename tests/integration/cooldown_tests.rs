//! §4.10 cooldown wiring through the public registry surface.
//!
//! The exact exponential-backoff schedule (1m/5m/25m/1h, 5h/10h/20h/24h) is
//! unit-tested directly against `schedule()` in `core::router::cooldown`,
//! since driving four real cooldown waits end to end would make this test
//! take over an hour. What's exercised here instead is the wiring a unit
//! test can't reach: a failure recorded through a live `FailoverEngine`
//! call is visible via `Registry::provider_status`, and `clear_all_cooldowns`
//! makes a cooled-down alias dispatchable again.

use llm_gateway_core::core::types::config::{DriverKind, GatewayConfig, ProviderConfig, PurposeConfig, ThinkingConfigSection};
use llm_gateway_core::{FailoverEngine, Registry};
use std::collections::HashMap;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider_pointing_at(base_url: &str) -> ProviderConfig {
    ProviderConfig {
        driver: DriverKind::Anthropic,
        subtype: None,
        api_key: Some("sk-test".into()),
        base_url: Some(base_url.to_string()),
        url: None,
        max_tokens: Some(1024),
        context_tokens: Some(200_000),
        timeout_seconds: 5,
        prompt_caching: false,
        embedding_only: false,
        incremental_context: false,
        server_tools_allowed: None,
        max_turns: None,
        keepalive_time: None,
        keepalive_timeout: None,
        cost_per_million_input: None,
        cost_per_million_output: None,
        cost_per_million_cache_read: None,
        cost_per_million_cache_write: None,
        trace: false,
        dump_on_success: false,
    }
}

fn success_sse_body() -> String {
    [
        r#"event: content_block_delta
data: {"type":"content_block_delta","delta":{"text":"recovered"}}

"#,
        r#"event: message_delta
data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":1}}

"#,
        "data: [DONE]\n\n",
    ]
    .concat()
}

#[tokio::test]
async fn a_recorded_failure_is_visible_and_clear_all_cooldowns_lifts_it() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limit exceeded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(success_sse_body(), "text/event-stream"))
        .mount(&server)
        .await;

    let mut providers = HashMap::new();
    providers.insert("a".to_string(), provider_pointing_at(&server.uri()));
    let config = GatewayConfig {
        providers,
        agent: PurposeConfig {
            models: vec!["a/m1".to_string()],
            max_input_tokens: None,
            auto_rebuild: None,
        },
        summarization: PurposeConfig::default(),
        embeddings: PurposeConfig::default(),
        thinking: ThinkingConfigSection::default(),
        system_prompt: String::new(),
        extra_purposes: HashMap::new(),
    };
    let registry = Arc::new(Registry::with_default_catalog(&config).unwrap());
    let engine = FailoverEngine::new(registry.clone());

    // Single candidate, first call fails: the engine has nothing left to
    // fail over to, so the call itself returns an error, but the cooldown
    // is still recorded on the way out.
    assert!(engine.simple("agent", "hello", "be helpful").await.is_err());
    let status = registry.provider_status();
    let a = status.get("a").unwrap();
    assert!(a.in_cooldown);
    assert_eq!(a.error_count, 1);

    // The cooldown would otherwise block A for a full minute; a config
    // reload or operator action that clears cooldowns must make it
    // dispatchable again immediately.
    registry.clear_all_cooldowns();
    let outcome = engine.simple("agent", "hello again", "be helpful").await.unwrap();
    assert_eq!(outcome.response.text, "recovered");
    assert!(!registry.provider_status().get("a").map(|s| s.in_cooldown).unwrap_or(false));
}
