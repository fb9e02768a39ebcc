//! Integration tests for the LLM adapter against a loopback HTTP server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sbx_core::repair::AiRepairer;
use sbx_core::{CoreError, RepairPrompt, TextGenerator};
use sbx_llm::{LlmAdapter, LlmError, LlmProvider};
use sbx_runner::{MockProvider, SandboxProvider};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Requests seen by the test server, lowercased.
#[derive(Clone, Default)]
struct Recorded(Arc<Mutex<Vec<String>>>);

impl Recorded {
    fn push(&self, request: String) {
        self.0.lock().unwrap().push(request);
    }

    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    fn get(&self, index: usize) -> String {
        self.0.lock().unwrap()[index].clone()
    }
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Serve `responses` in order, one per connection; the last one repeats.
async fn serve(responses: Vec<(u16, String)>) -> (String, Recorded) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let recorded = Recorded::default();
    let seen = recorded.clone();

    tokio::spawn(async move {
        let mut served = 0usize;
        while let Ok((mut socket, _)) = listener.accept().await {
            let request = read_request(&mut socket).await;
            seen.push(request.to_lowercase());
            let (status, body) = &responses[served.min(responses.len() - 1)];
            served += 1;
            let reply = format!(
                "HTTP/1.1 {} Test\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(reply.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (url, recorded)
}

fn openai_body(content: &str) -> String {
    serde_json::json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 120, "completion_tokens": 30 }
    })
    .to_string()
}

fn adapter(provider: LlmProvider, url: &str) -> LlmAdapter {
    LlmAdapter::new(provider, "test-key", None)
        .with_base_url(url)
        .with_backoff(Duration::from_millis(1))
}

fn prompt() -> RepairPrompt {
    RepairPrompt {
        system: "You repair components.".to_string(),
        source: "export default function App() {}".to_string(),
        errors: vec!["SyntaxError: Unexpected token".to_string()],
    }
}

#[tokio::test]
async fn test_openai_completion() {
    let (url, recorded) = serve(vec![(200, openai_body("fixed"))]).await;
    let adapter = adapter(LlmProvider::OpenAI, &url);

    let response = adapter.complete("system text", "user text").await.unwrap();
    assert_eq!(response.content, "fixed");
    assert_eq!(response.total_tokens(), 150);
    assert_eq!(response.model, "gpt-4o-mini");

    let request = recorded.get(0);
    assert!(request.starts_with("post /chat/completions"));
    assert!(request.contains("authorization: bearer test-key"));
    assert!(request.contains("\"role\":\"system\""));
    assert!(request.contains("user text"));
}

#[tokio::test]
async fn test_anthropic_completion() {
    let body = serde_json::json!({
        "content": [{ "type": "text", "text": "{\"code\": \"x\"}" }],
        "usage": { "input_tokens": 10, "output_tokens": 5 }
    })
    .to_string();
    let (url, recorded) = serve(vec![(200, body)]).await;
    let adapter = adapter(LlmProvider::Anthropic, &url);

    let response = adapter.complete("system text", "user text").await.unwrap();
    assert_eq!(response.content, "{\"code\": \"x\"}");
    assert_eq!(response.total_tokens(), 15);

    let request = recorded.get(0);
    assert!(request.starts_with("post /messages"));
    assert!(request.contains("x-api-key: test-key"));
    assert!(request.contains("anthropic-version: 2023-06-01"));
    assert!(request.contains("\"system\":\"system text\""));
}

#[tokio::test]
async fn test_retries_server_errors() {
    let (url, recorded) = serve(vec![
        (503, "overloaded".to_string()),
        (200, openai_body("second time lucky")),
    ])
    .await;
    let adapter = adapter(LlmProvider::OpenAI, &url);

    let response = adapter.complete("s", "u").await.unwrap();
    assert_eq!(response.content, "second time lucky");
    assert_eq!(recorded.len(), 2);
}

#[tokio::test]
async fn test_rate_limit_exhausts_attempts() {
    let (url, recorded) = serve(vec![(429, "slow down".to_string())]).await;
    let adapter = adapter(LlmProvider::OpenAI, &url);

    let err = adapter.complete("s", "u").await.unwrap_err();
    assert!(matches!(err, LlmError::Api { status: 429, .. }));
    assert_eq!(recorded.len(), 3);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let (url, recorded) = serve(vec![(401, "bad key".to_string())]).await;
    let adapter = adapter(LlmProvider::Anthropic, &url);

    let err = adapter.complete("s", "u").await.unwrap_err();
    assert!(matches!(err, LlmError::Api { status: 401, .. }));
    assert!(err.to_string().contains("bad key"));
    assert_eq!(recorded.len(), 1);
}

#[tokio::test]
async fn test_empty_content_is_an_error() {
    let (url, _) = serve(vec![(200, openai_body("   "))]).await;
    let adapter = adapter(LlmProvider::OpenAI, &url);

    assert!(matches!(
        adapter.complete("s", "u").await,
        Err(LlmError::EmptyResponse(_))
    ));
}

#[tokio::test]
async fn test_generator_reports_usage_and_maps_errors() {
    let (url, recorded) = serve(vec![(200, openai_body("ok"))]).await;
    let generated = adapter(LlmProvider::OpenAI, &url).generate(&prompt()).await.unwrap();
    assert_eq!(generated.text, "ok");
    assert_eq!(generated.tokens_used, 150);
    // The user turn carries the numbered errors and the source.
    assert!(recorded.get(0).contains("1. syntaxerror: unexpected token"));

    let (url, _) = serve(vec![(400, "bad request".to_string())]).await;
    let err = adapter(LlmProvider::OpenAI, &url).generate(&prompt()).await.unwrap_err();
    assert!(matches!(err, CoreError::Generation(_)));
}

#[tokio::test]
async fn test_adapter_drives_ai_repair() {
    let fixed = "export default function App() {\n  return <p>ok</p>;\n}\n";
    let reply = serde_json::json!({ "code": fixed, "explanation": "Closed the JSX tag" }).to_string();
    let (url, _) = serve(vec![(200, openai_body(&reply))]).await;

    let mock = MockProvider::new().with_file("src/App.jsx", "export default function App() {\n  return <p>ok;\n}\n");
    mock.create().await.unwrap();

    let repairer = AiRepairer::new(Arc::new(adapter(LlmProvider::OpenAI, &url)));
    let errors = vec![sbx_core::ClassifiedError::new(
        sbx_core::ErrorCategory::SyntaxError,
        sbx_core::FixTier::Ai,
        "Unterminated JSX contents",
    )];
    let outcome = repairer.repair(&mock, &errors).await;

    assert!(outcome.success);
    assert_eq!(outcome.tokens_used, 150);
    assert_eq!(outcome.explanation.as_deref(), Some("Closed the JSX tag"));
    assert_eq!(mock.file("src/App.jsx").as_deref(), Some(fixed));
}
