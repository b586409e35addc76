//! Generation provider abstraction
//!
//! Provides the trait seam between stages and the language/image model
//! provider, enabling testing without a live provider. Each stage issues
//! at most a handful of `complete` calls per run; the Design stage is
//! the only caller of `generate_image`.

pub mod api;

pub use api::HttpGenerationClient;

use async_trait::async_trait;

use crate::error::Result;

/// One round-trip to a generation provider.
///
/// Implementations must be cancel-safe: the engine may drop an in-flight
/// call when the overall run deadline expires.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Sends a prompt to the language model and returns the raw text of
    /// the response.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Requests one image and returns a reference (URL or asset id).
    async fn generate_image(&self, prompt: &str) -> Result<String>;
}

/// Extracts the first JSON value from raw model output.
///
/// Models routinely wrap JSON in markdown fences or surround it with
/// prose; this finds the outermost `{..}` or `[..]` span, honoring
/// string escapes so braces inside strings don't unbalance the scan.
pub fn extract_json(raw: &str) -> Option<&str> {
    let open = raw.find(['{', '['])?;
    let bytes = raw.as_bytes();
    let (open_ch, close_ch) = if bytes[open] == b'{' {
        (b'{', b'}')
    } else {
        (b'[', b']')
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open_ch => depth += 1,
            _ if b == close_ch => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[open..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses raw model output into `T`, tolerating surrounding prose and
/// markdown fences. The error string is suitable for appending to the
/// shared state's diagnostics.
pub fn parse_payload<T: serde::de::DeserializeOwned>(raw: &str) -> std::result::Result<T, String> {
    let json = extract_json(raw).ok_or_else(|| "response contains no JSON".to_string())?;
    serde_json::from_str(json).map_err(|e| {
        if e.to_string().contains("missing field") {
            format!("invalid schema: {e}")
        } else {
            format!("unparseable payload: {e}")
        }
    })
}
