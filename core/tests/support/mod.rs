#![allow(dead_code)]
//! Shared helpers for the integration tests: scripted `sh` mock MCP
//! servers speaking one JSON object per line over stdio.

use std::future::Future;
use std::time::{Duration, Instant};
use tether_core::ConnectionConfig;

/// Well-behaved mock server: answers the handshake, a fixed tool/resource
/// catalog, and echoes the `nonce` argument (and observed request id) back
/// from `tools/call`. A call naming the `boom` tool gets an RPC error.
pub const ECHO_SERVER: &str = r##"
while IFS= read -r line; do
  case "$line" in
    *'"method":"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"mock-echo","version":"0.1.0"}}}'
      ;;
    *'"method":"notifications/initialized"'*)
      ;;
    *'"method":"tools/list"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":0,"result":{"tools":[{"name":"ping","description":"Answers every call with pong","inputSchema":{"type":"object"}}]}}'
      ;;
    *'"method":"resources/list"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":0,"result":{"resources":[{"uri":"mock://data","name":"data","description":"Mock data","mimeType":"text/plain"}]}}'
      ;;
    *'"name":"boom"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":0,"error":{"code":-32000,"message":"boom exploded"}}'
      ;;
    *'"method":"tools/call"'*)
      id=${line#*'"id":'}; id=${id%%,*}
      nonce=${line#*'"nonce":'}; nonce=${nonce%%\}*}
      printf '{"jsonrpc":"2.0","id":%s,"result":{"nonce":%s,"observed":%s}}\n' "$id" "$nonce" "$id"
      ;;
  esac
done
"##;

/// Rejects the handshake with an RPC error.
pub const INIT_ERROR_SERVER: &str = r##"
while IFS= read -r line; do
  case "$line" in
    *'"method":"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"unsupported client"}}'
      ;;
  esac
done
"##;

/// Completes the handshake, then exits as soon as the initialized
/// notification arrives.
pub const EXIT_AFTER_HANDSHAKE_SERVER: &str = r##"
IFS= read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"mock-flaky","version":"0.1.0"}}}'
IFS= read -r line
exit 0
"##;

/// Completes the handshake but answers `tools/list` with a non-JSON line.
pub const GARBAGE_SERVER: &str = r##"
while IFS= read -r line; do
  case "$line" in
    *'"method":"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"mock-garbage","version":"0.1.0"}}}'
      ;;
    *'"method":"notifications/initialized"'*)
      ;;
    *'"method":"tools/list"'*)
      printf '%s\n' 'this is not json'
      ;;
  esac
done
"##;

/// Config launching `script` under `sh -c`.
pub fn shell_config(id: &str, script: &str) -> ConnectionConfig {
    ConnectionConfig {
        id: id.to_string(),
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        env: None,
        working_dir: None,
    }
}

/// Config whose command does not exist on any PATH.
pub fn unreachable_config(id: &str) -> ConnectionConfig {
    ConnectionConfig {
        id: id.to_string(),
        command: "nonexistent-command-12345".to_string(),
        args: vec![],
        env: None,
        working_dir: None,
    }
}

/// Poll `probe` until it returns true or `deadline` elapses.
pub async fn eventually<F, Fut>(deadline: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    loop {
        if probe().await {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
