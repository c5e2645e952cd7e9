//! End-to-end tests against a fake automation process written in `sh`.

#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::{Map, Value, json};
use vigil_transport::{ToolBackend, ToolTransport, TransportConfig, TransportError};

/// Answers `initialize`, `snapshot`, `click`; sleeps on `slow`; exits on
/// `die` (or on any tool call when `$DIE_ON` matches the spawn count).
const FAKE_SERVER: &str = r#"
count_file="$1"
die_on="$2"
n=0
if [ -n "$count_file" ]; then
  n=$(cat "$count_file" 2>/dev/null || echo 0)
  n=$((n + 1))
  echo "$n" > "$count_file"
fi
echo "fake automation $n starting" >&2
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"version":"1","id":%s,"result":{"server":"fake"}}\n' "$id" ;;
    *)
      if [ "$die_on" = "all" ] || [ "$die_on" = "$n" ]; then exit 1; fi
      case "$line" in
        *'"name":"snapshot"'*)
          printf '{"version":"1","id":%s,"result":{"success":true,"message":"captured","content":"- button Save [ref=e1]"}}\n' "$id" ;;
        *'"name":"click"'*)
          printf 'noise that is not json\n'
          printf '{"version":"1","id":%s,"result":{"success":true,"message":"clicked"}}\n' "$id" ;;
        *'"name":"slow"'*)
          sleep 2 ;;
        *'"name":"die"'*)
          exit 3 ;;
        *)
          printf '{"version":"1","id":%s,"error":{"code":-32601,"message":"unknown tool"}}\n' "$id" ;;
      esac ;;
  esac
done
"#;

fn config(count_file: Option<&Path>, die_on: &str) -> TransportConfig {
    let count = count_file.map(|p| p.display().to_string()).unwrap_or_default();
    TransportConfig {
        command: "sh".into(),
        args: vec![
            "-c".into(),
            FAKE_SERVER.into(),
            "fake-automation".into(),
            count,
            die_on.into(),
        ],
        handshake_timeout: Duration::from_secs(5),
        call_timeout: Duration::from_secs(5),
    }
}

fn spawn_count(path: &Path) -> u32 {
    std::fs::read_to_string(path).unwrap().trim().parse().unwrap()
}

fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

#[tokio::test]
async fn snapshot_round_trip() {
    let transport = ToolTransport::new(config(None, ""));
    let outcome = transport.call_tool("snapshot", &Map::new()).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.content.as_deref(), Some("- button Save [ref=e1]"));
    assert!(transport.is_connected().await);
    transport.shutdown().await;
    assert!(!transport.is_connected().await);
}

#[tokio::test]
async fn sequential_calls_share_one_process() {
    let dir = tempfile::tempdir().unwrap();
    let count = dir.path().join("count");
    let transport = ToolTransport::new(config(Some(&count), ""));

    for _ in 0..3 {
        let outcome = transport
            .execute("click", &args(&[("element", json!("Save")), ("ref", json!("e1"))]))
            .await
            .unwrap();
        assert_eq!(outcome.message, "clicked");
    }
    assert_eq!(spawn_count(&count), 1);
    assert_eq!(transport.respawn_count(), 0);
}

#[tokio::test]
async fn unknown_tool_is_failed_outcome() {
    let transport = ToolTransport::new(config(None, ""));
    let outcome = transport.call_tool("hover", &Map::new()).await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.message.contains("unknown tool"));
}

#[tokio::test]
async fn death_mid_call_respawns_once_and_retries() {
    let dir = tempfile::tempdir().unwrap();
    let count = dir.path().join("count");
    let transport = ToolTransport::new(config(Some(&count), "1"));

    let outcome = transport.call_tool("snapshot", &Map::new()).await.unwrap();
    assert!(outcome.success);
    assert_eq!(spawn_count(&count), 2);
    assert_eq!(transport.respawn_count(), 1);
}

#[tokio::test]
async fn second_death_is_process_died() {
    let dir = tempfile::tempdir().unwrap();
    let count = dir.path().join("count");
    let transport = ToolTransport::new(config(Some(&count), "all"));

    let err = transport.call_tool("snapshot", &Map::new()).await.unwrap_err();
    assert_matches!(err, TransportError::ProcessDied { .. });
    assert_eq!(err.kind(), vigil_core::errors::ErrorKind::Transport);
    assert_eq!(spawn_count(&count), 2);
    assert!(!transport.is_connected().await);
}

#[tokio::test]
async fn client_recovers_after_reported_death() {
    let dir = tempfile::tempdir().unwrap();
    let count = dir.path().join("count");
    let transport = ToolTransport::new(config(Some(&count), ""));

    let err = transport.call_tool("die", &Map::new()).await.unwrap_err();
    assert_matches!(err, TransportError::ProcessDied { .. });

    let outcome = transport.call_tool("snapshot", &Map::new()).await.unwrap();
    assert!(outcome.success);
    assert_eq!(spawn_count(&count), 3);
}

#[tokio::test]
async fn timeout_is_failed_outcome() {
    let mut cfg = config(None, "");
    cfg.call_timeout = Duration::from_millis(200);
    let transport = ToolTransport::new(cfg);

    let outcome = transport.call_tool("slow", &Map::new()).await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.message.contains("timed out after 200ms"));
    assert_eq!(transport.respawn_count(), 0);
    transport.shutdown().await;
}

#[tokio::test]
async fn silent_process_fails_handshake() {
    let transport = ToolTransport::new(TransportConfig {
        command: "sh".into(),
        args: vec!["-c".into(), "while read -r _; do :; done".into()],
        handshake_timeout: Duration::from_millis(200),
        call_timeout: Duration::from_secs(1),
    });
    let err = transport.start().await.unwrap_err();
    assert_matches!(err, TransportError::Handshake { ref reason } if reason.contains("200ms"));
}

#[tokio::test]
async fn handshake_error_reply_is_rejected() {
    let script = r#"while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  printf '{"id":%s,"error":{"code":1,"message":"unsupported version"}}\n' "$id"
done"#;
    let transport = ToolTransport::new(TransportConfig {
        command: "sh".into(),
        args: vec!["-c".into(), script.into()],
        handshake_timeout: Duration::from_secs(5),
        call_timeout: Duration::from_secs(5),
    });
    let err = transport.call_tool("snapshot", &Map::new()).await.unwrap_err();
    assert_matches!(err, TransportError::Handshake { ref reason } if reason.contains("unsupported version"));
}
