//! Prompt assembly and reply cleanup

use std::fs;
use std::io;
use std::path::Path;

use tracing::warn;

use crate::config::InteractionConfig;

/// Join the last `count` non-empty transcript lines with spaces
///
/// A missing transcript reads as empty.
pub fn recent_transcript(path: &Path, count: usize) -> String {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(?path, error = %e, "failed to read transcript");
            }
            return String::new();
        }
    };

    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..]
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Prompt for a television comment
pub fn television_prompt(transcript: &str, config: &InteractionConfig) -> String {
    if transcript.is_empty() {
        config.television_prompt_empty.clone()
    } else {
        format!(
            "{}{}{}",
            config.television_prompt_prefix, transcript, config.television_prompt_suffix
        )
    }
}

/// Trim a model reply to whole sentences and strip characters that trip up
/// speech synthesis
pub fn clean_response(response: &str) -> String {
    let truncated = match response.rfind(['.', '!', '?']) {
        Some(end) => &response[..=end],
        None => response,
    };

    truncated
        .trim()
        .chars()
        .filter(|c| !matches!(c, '*' | '"' | '\'' | '\u{2018}' | '\u{2019}'))
        .collect()
}
