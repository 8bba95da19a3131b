#![allow(clippy::expect_used, clippy::unwrap_used)]

use assert_cmd::Command;
use std::path::Path;
use std::time::Duration;

#[allow(dead_code)]
pub const CMD_TIMEOUT: Duration = Duration::from_secs(30);

/// Unroutable backend, so an accidental call fails fast instead of leaving the machine.
#[allow(dead_code)]
pub const DEAD_BACKEND: &str = "http://127.0.0.1:9/v1/chat/completions";

#[allow(dead_code)]
pub const SESSION_TOKEN: &str = "cli-session-0123456789";

/// Create a `quire` command isolated under `dir`.
///
/// Config and data both live in `dir`; the backend points nowhere unless the
/// test overrides `QUIRE_API_URL`.
#[allow(dead_code)]
pub fn quire_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("quire"));
    cmd.timeout(CMD_TIMEOUT);
    cmd.env("QUIRE_CONFIG", dir.join("config.toml"));
    cmd.env("QUIRE_DATA_DIR", dir.join("data"));
    cmd.env("QUIRE_API_URL", DEAD_BACKEND);
    cmd.env_remove("QUIRE_API_KEY");
    cmd.env_remove("QUIRE_MODEL");
    cmd.env_remove("QUIRE_SESSION_TOKEN");
    cmd.env("NO_COLOR", "1");
    cmd
}

/// Chat-completions body carrying `content` as the assistant message.
#[allow(dead_code)]
pub fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}
