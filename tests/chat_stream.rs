mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::http::StatusCode;
use common::{
    body_bytes, body_json, build_state, chat_request, is_done_event, post_json, sse_events,
    ScriptedModel, Tick,
};
use http_body_util::BodyExt;
use llmbase::protocol::canonical::FinishReason;
use serde_json::{json, Value};

const PATH: &str = "/v1/chat/completions";

fn with_tools(mut request: Value) -> Value {
    request["tools"] = json!([{
        "name": "get_weather",
        "description": "Current weather for a city",
        "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
    }]);
    request
}

/// Stream `model` and return the decoded chunks; asserts the `[DONE]` framing.
async fn stream_chunks(model: ScriptedModel, request: Value) -> Vec<Value> {
    let state = build_state(model);
    let response = post_json(&state, PATH, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    let events = sse_events(&body_bytes(response).await);

    let done_count = events.iter().filter(|e| is_done_event(e)).count();
    assert_eq!(done_count, 1, "exactly one [DONE]");
    assert!(is_done_event(events.last().unwrap()), "[DONE] is last");

    events[..events.len() - 1]
        .iter()
        .map(|e| serde_json::from_str(&e.data).unwrap())
        .collect()
}

fn content(chunks: &[Value]) -> String {
    chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect()
}

fn finish_reasons(chunks: &[Value]) -> Vec<&str> {
    chunks
        .iter()
        .filter_map(|c| c["choices"][0]["finish_reason"].as_str())
        .collect()
}

#[tokio::test]
async fn test_plain_text_stream() {
    let model = ScriptedModel::splitting(&["Hel", "lo ", "there", " my", " friend"], FinishReason::Stop);
    let chunks = stream_chunks(model, chat_request("hi", true)).await;

    assert_eq!(chunks[0]["choices"][0]["delta"], json!({"role": "assistant"}));
    assert_eq!(chunks[0]["object"], "chat.completion.chunk");
    assert_eq!(chunks[0]["id"], "");
    assert_eq!(chunks[0]["model"], "chatglm3-6b");
    assert_eq!(content(&chunks), "Hello there my friend");
    assert_eq!(finish_reasons(&chunks), ["stop"]);
    assert!(chunks.last().unwrap()["choices"][0]["finish_reason"].is_string());
}

#[tokio::test]
async fn test_first_content_chunk_flushes_buffer() {
    let model = ScriptedModel::splitting(&["Hel", "lo ", "there", " friend"], FinishReason::Stop);
    let chunks = stream_chunks(model, chat_request("hi", true)).await;
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "Hello there");
}

#[tokio::test]
async fn test_length_finish_reason_passes_through() {
    let model = ScriptedModel::splitting(&["Once upon", " a time"], FinishReason::Length);
    let chunks = stream_chunks(model, chat_request("hi", true)).await;
    assert_eq!(finish_reasons(&chunks), ["length"]);
}

#[tokio::test]
async fn test_function_call_stream() {
    let model = ScriptedModel::splitting(
        &["get_", "weather\n", "```python\n", "tool_call(city='Paris', days=3)\n", "```"],
        FinishReason::Stop,
    );
    let chunks = stream_chunks(model, with_tools(chat_request("weather?", true))).await;

    assert_eq!(chunks.len(), 3);
    let call = &chunks[1]["choices"][0]["delta"]["function_call"];
    assert_eq!(call["name"], "get_weather");
    let arguments: Value = serde_json::from_str(call["arguments"].as_str().unwrap()).unwrap();
    assert_eq!(arguments, json!({"city": "Paris", "days": 3}));
    assert_eq!(content(&chunks), "");
    assert_eq!(finish_reasons(&chunks), ["function_call"]);
}

#[tokio::test]
async fn test_malformed_function_call_falls_back_to_text() {
    let text = "get_weather\n```python\ntool_call(city='Paris'\n```";
    let model = ScriptedModel::splitting(&["get_weather", "\n```python\n", "tool_call(city='Paris'\n```"], FinishReason::Stop);
    let chunks = stream_chunks(model, with_tools(chat_request("weather?", true))).await;

    assert_eq!(content(&chunks), text);
    assert_eq!(finish_reasons(&chunks), ["stop"]);
    assert!(chunks
        .iter()
        .all(|c| c["choices"][0]["delta"].get("function_call").is_none()));
}

#[tokio::test]
async fn test_deeply_nested_call_is_delivered_as_text() {
    let text = format!("get_x\n```python\ntool_call(a={})\n```", "[".repeat(50_000));

    let model = ScriptedModel::splitting(&[text.as_str()], FinishReason::Stop);
    let chunks = stream_chunks(model, with_tools(chat_request("hi", true))).await;
    assert_eq!(content(&chunks), text);
    assert_eq!(finish_reasons(&chunks), ["stop"]);

    let state = build_state(ScriptedModel::splitting(&[text.as_str()], FinishReason::Stop));
    let body = body_json(post_json(&state, PATH, with_tools(chat_request("hi", false))).await).await;
    assert_eq!(body["choices"][0]["message"]["content"], text.as_str());
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn test_marker_without_tools_streams_raw_text() {
    let model = ScriptedModel::splitting(&["g", "e", "t_", "foo", "(", "x)"], FinishReason::Stop);
    let chunks = stream_chunks(model, chat_request("hi", true)).await;
    // Header, the buffered call text, then the terminal chunk.
    assert_eq!(chunks.len(), 3);
    assert_eq!(content(&chunks), "get_foo(x)");
}

#[tokio::test]
async fn test_short_answer_is_flushed_at_end() {
    let model = ScriptedModel::splitting(&["O", "K"], FinishReason::Stop);
    let chunks = stream_chunks(model, chat_request("hi", true)).await;
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "OK");
    assert_eq!(finish_reasons(&chunks), ["stop"]);
}

#[tokio::test]
async fn test_stream_matches_non_stream_for_any_split() {
    let text = "Streaming and batch answers must agree, 完全一致.";
    let chars: Vec<char> = text.chars().collect();

    let state = build_state(ScriptedModel::splitting(&[text], FinishReason::Stop));
    let reference = body_json(post_json(&state, PATH, chat_request("hi", false)).await).await;
    let reference = reference["choices"][0]["message"]["content"].as_str().unwrap().to_owned();
    assert_eq!(reference, text);

    for step in [1, 2, 3, 5, 8, 13] {
        let pieces: Vec<String> = chars.chunks(step).map(|c| c.iter().collect()).collect();
        let pieces: Vec<&str> = pieces.iter().map(String::as_str).collect();
        let model = ScriptedModel::splitting(&pieces, FinishReason::Stop);
        let chunks = stream_chunks(model, chat_request("hi", true)).await;
        assert_eq!(content(&chunks), reference, "step={step}");
        assert_eq!(finish_reasons(&chunks).len(), 1);
    }
}

#[tokio::test]
async fn test_failure_before_output_is_plain_500() {
    let state = build_state(ScriptedModel::new(vec![Tick::fail("device lost")]));
    let response = post_json(&state, PATH, chat_request("hi", true)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "server_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("device lost"));
}

#[tokio::test]
async fn test_failure_mid_stream_ends_with_error_then_done() {
    let state = build_state(ScriptedModel::new(vec![
        Tick::text("Hello there"),
        Tick::fail("device lost"),
    ]));
    let response = post_json(&state, PATH, chat_request("hi", true)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let events = sse_events(&body_bytes(response).await);

    assert!(is_done_event(events.last().unwrap()));
    let error: Value = serde_json::from_str(&events[events.len() - 2].data).unwrap();
    assert_eq!(error["error"]["type"], "server_error");
    assert_eq!(events.iter().filter(|e| is_done_event(e)).count(), 1);
}

#[tokio::test]
async fn test_source_without_terminal_step_is_closed() {
    let state = build_state(ScriptedModel::new(vec![
        Tick::text("Hello"),
        Tick::text("Hello there"),
    ]));
    let response = post_json(&state, PATH, chat_request("hi", true)).await;
    let events = sse_events(&body_bytes(response).await);
    let chunks: Vec<Value> = events[..events.len() - 1]
        .iter()
        .map(|e| serde_json::from_str(&e.data).unwrap())
        .collect();
    assert_eq!(content(&chunks), "Hello there");
    assert_eq!(finish_reasons(&chunks), ["stop"]);
}

#[tokio::test]
async fn test_client_disconnect_stops_generation() {
    let script: Vec<Tick> = (1..=200)
        .map(|n| Tick::Text("word ".repeat(n)))
        .collect();
    let model = ScriptedModel::new(script).with_tick_delay(Duration::from_millis(5));
    let pulled = model.pulled();
    let state = build_state(model);

    let response = post_json(&state, PATH, chat_request("hi", true)).await;
    let mut body = response.into_body();
    let first = body.frame().await.unwrap().unwrap();
    assert!(first.is_data());
    drop(body);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let seen = pulled.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pulled.load(Ordering::SeqCst), seen, "generation kept running");
    assert!(seen < 200);

    // The model slot is free again.
    let slot = tokio::time::timeout(Duration::from_secs(1), state.slot().acquire()).await;
    assert!(matches!(slot, Ok(Ok(_))));
}
