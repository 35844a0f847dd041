//! §8 end-to-end scenarios 1 and 2: primary failure triggers failover to the
//! secondary, and a pre-cooled primary is skipped without a network call.

use llm_gateway_core::core::types::config::{DriverKind, GatewayConfig, ProviderConfig, PurposeConfig, ThinkingConfigSection};
use llm_gateway_core::{ErrorKind, FailoverEngine, Registry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
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

fn config(providers: HashMap<String, ProviderConfig>, models: Vec<&str>) -> GatewayConfig {
    GatewayConfig {
        providers,
        agent: PurposeConfig {
            models: models.into_iter().map(str::to_string).collect(),
            max_input_tokens: None,
            auto_rebuild: None,
        },
        summarization: PurposeConfig::default(),
        embeddings: PurposeConfig::default(),
        thinking: ThinkingConfigSection::default(),
        system_prompt: String::new(),
        extra_purposes: HashMap::new(),
    }
}

fn success_sse_body() -> String {
    [
        r#"event: message_start
data: {"type":"message_start","message":{"usage":{"input_tokens":10}}}

"#,
        r#"event: content_block_delta
data: {"type":"content_block_delta","delta":{"text":"hi from B"}}

"#,
        r#"event: message_delta
data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}

"#,
        "data: [DONE]\n\n",
    ]
    .concat()
}

#[tokio::test]
async fn primary_rate_limited_fails_over_to_secondary() {
    let server_a = MockServer::start().await;
    let server_b = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limit exceeded, please retry later"))
        .mount(&server_a)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(success_sse_body(), "text/event-stream"),
        )
        .mount(&server_b)
        .await;

    let mut providers = HashMap::new();
    providers.insert("a".to_string(), provider_pointing_at(&server_a.uri()));
    providers.insert("b".to_string(), provider_pointing_at(&server_b.uri()));
    let config = config(providers, vec!["a/m1", "b/m2"]);
    let registry = Arc::new(Registry::with_default_catalog(&config).unwrap());
    let engine = FailoverEngine::new(registry.clone());

    let outcome = engine.simple("agent", "hello", "be helpful").await.unwrap();

    assert_eq!(outcome.model_used, "b/m2");
    assert!(outcome.failed_over);
    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(outcome.attempts[0].reference, "a/m1");
    assert!(!outcome.attempts[0].skipped);
    assert_eq!(outcome.attempts[0].error_kind, Some(ErrorKind::RateLimit));
    assert_eq!(outcome.attempts[1].reference, "b/m2");
    assert!(!outcome.attempts[1].skipped);
    assert_eq!(outcome.response.text, "hi from B");

    let status = registry.provider_status();
    let a_status = status.get("a").expect("alias a should have a cooldown entry");
    assert!(a_status.in_cooldown);
    assert_eq!(a_status.error_count, 1);
    let until = a_status.until.expect("cooldown entry must carry a deadline");
    let now = SystemTime::now();
    let remaining = until.duration_since(now).unwrap_or_default();
    assert!(remaining <= Duration::from_secs(60) && remaining > Duration::from_secs(0));
}

#[tokio::test]
async fn primary_in_cooldown_is_skipped_and_only_secondary_is_called() {
    let server_a = MockServer::start().await;
    let server_b = MockServer::start().await;

    // A only ever answers once, with a failure, to seed its cooldown entry
    // through the public call path rather than reaching into private
    // registry state. If the second call reached A again (cooldown not
    // honoured), wiremock would reject the unexpected extra request.
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limit exceeded"))
        .up_to_n_times(1)
        .mount(&server_a)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(success_sse_body(), "text/event-stream"))
        .mount(&server_b)
        .await;

    let mut providers = HashMap::new();
    providers.insert("a".to_string(), provider_pointing_at(&server_a.uri()));
    providers.insert("b".to_string(), provider_pointing_at(&server_b.uri()));
    let config = config(providers, vec!["a/m1", "b/m2"]);
    let registry = Arc::new(Registry::with_default_catalog(&config).unwrap());
    let engine = FailoverEngine::new(registry);

    let first = engine.simple("agent", "hello", "be helpful").await.unwrap();
    assert!(!first.attempts[0].skipped, "A must actually be called once to seed its cooldown");

    let second = engine.simple("agent", "hello again", "be helpful").await.unwrap();
    assert_eq!(second.model_used, "b/m2");
    assert_eq!(second.attempts[0].reference, "a/m1");
    assert!(second.attempts[0].skipped, "A's cooldown from the first call must skip the second attempt");
}
