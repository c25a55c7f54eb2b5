//! Prompt construction and strict parsing of model replies into an
//! [`AnswerRecord`].
//!
//! Context passages are tagged `[S1]`, `[S2]`, ... per distinct source URL.
//! Replies are accepted as JSON (`{"answer", "sources"}`) or as plain text
//! with inline tags and an optional trailing `SOURCES:` line. Citations are
//! resolved against the supplied sources only; when none resolve, every
//! supplied source is attributed. Tags in the answer are renumbered to
//! match the order of `cited_source_urls` (`[S3]` becomes `[1]` when S3 is
//! cited first).

use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

use newsrag_core::traits::ChatModel;
use newsrag_core::types::{AnswerRecord, ChatRequest, RetrievalResult};
use newsrag_core::{Error, Result};

pub const INSUFFICIENT_INFORMATION: &str =
    "I don't have enough information from the ingested sources to answer that question.";

const SYSTEM_PROMPT: &str = r#"You answer questions about current news using ONLY the numbered context passages supplied by the user.
Each passage starts with a source tag such as [S1] followed by its URL.
Rules:
- Do not use outside knowledge. If the passages do not contain the answer, say so.
- After each statement, cite the tag(s) of the passages that support it, e.g. [S2].
- Reply with a JSON object: {"answer": "<answer text with inline tags>", "sources": ["S1", ...]}
  where "sources" lists every tag you cited."#;

#[derive(Debug, Deserialize)]
struct ModelAnswer {
    answer: String,
    #[serde(default)]
    sources: Vec<String>,
}

fn answer_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "answer": { "type": "string" },
            "sources": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["answer", "sources"],
        "additionalProperties": false
    })
}

pub struct AnswerSynthesizer {
    model: Arc<dyn ChatModel>,
    request_schema: bool,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn ChatModel>, request_schema: bool) -> Self { Self { model, request_schema } }

    pub async fn synthesize(&self, query: &str, retrieved: &RetrievalResult) -> Result<AnswerRecord> {
        if retrieved.is_empty() {
            debug!("nothing retrieved, skipping model call");
            return Ok(AnswerRecord { answer_text: INSUFFICIENT_INFORMATION.to_string(), cited_source_urls: Vec::new() });
        }
        let sources = retrieved.source_urls();
        let request = ChatRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: build_user_message(query, retrieved, &sources),
            response_schema: self.request_schema.then(answer_schema),
        };
        let reply = self.model.complete(&request).await?;
        let record = parse_reply(&reply, &sources)?;
        debug!(model = self.model.model_id(), cited = record.cited_source_urls.len(), "answer synthesized");
        Ok(record)
    }
}

pub fn build_user_message(query: &str, retrieved: &RetrievalResult, sources: &[String]) -> String {
    let mut message = String::from("Context passages:\n");
    for hit in retrieved {
        let tag = sources.iter().position(|s| s == &hit.source_url).map_or(0, |i| i + 1);
        let _ = write!(message, "\n[S{tag}] ({})\n{}\n", hit.source_url, hit.chunk.text.trim());
    }
    let _ = write!(message, "\nQuestion: {}", query.trim());
    message
}

/// Turn a raw model reply into an answer with resolved citations.
pub fn parse_reply(reply: &str, sources: &[String]) -> Result<AnswerRecord> {
    let body = strip_code_fence(reply.trim());
    let (answer, listed) = match serde_json::from_str::<ModelAnswer>(body) {
        Ok(parsed) => (parsed.answer.trim().to_string(), parsed.sources),
        Err(_) => split_sources_trailer(body),
    };
    if answer.is_empty() {
        return Err(Error::synthesis_fatal("model returned an empty answer"));
    }

    let mut cited: Vec<usize> = Vec::new();
    let inline = inline_tags(&answer);
    for idx in inline.iter().flat_map(|(_, _, tags)| tags.iter()).copied().chain(listed.iter().filter_map(|c| resolve(c, sources))) {
        if idx < sources.len() && !cited.contains(&idx) {
            cited.push(idx);
        }
    }

    if cited.is_empty() {
        warn!(sources = sources.len(), "no citations could be extracted, attributing all retrieved sources");
        return Ok(AnswerRecord { answer_text: answer, cited_source_urls: sources.to_vec() });
    }
    Ok(AnswerRecord {
        answer_text: renumber(&answer, &inline, &cited),
        cited_source_urls: cited.into_iter().map(|i| sources[i].clone()).collect(),
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else { return text };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Split a plain-text reply at its last `SOURCES:` line.
fn split_sources_trailer(text: &str) -> (String, Vec<String>) {
    let lines: Vec<&str> = text.lines().collect();
    let trailer = lines.iter().rposition(|line| {
        let line = line.trim().trim_start_matches(['*', '#', ' ']);
        line.get(..8).is_some_and(|head| head.eq_ignore_ascii_case("sources:"))
    });
    let Some(at) = trailer else { return (text.trim().to_string(), Vec::new()) };

    let line = lines[at].trim().trim_start_matches(['*', '#', ' ']);
    let mut entries: Vec<String> = line[8..]
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .map(|s| s.trim_matches(|c: char| matches!(c, '*' | '[' | ']' | '(' | ')' | '<' | '>' | '.')).to_string())
        .filter(|s| !s.is_empty())
        .collect();
    // entries may continue on following lines (one URL per line)
    for extra in &lines[at + 1..] {
        let extra = extra.trim().trim_start_matches(['-', '*', ' ']);
        if !extra.is_empty() {
            entries.push(extra.trim_matches(|c: char| matches!(c, '[' | ']' | '(' | ')' | '<' | '>')).to_string());
        }
    }
    (lines[..at].join("\n").trim().to_string(), entries)
}

fn parse_tag(token: &str) -> Option<usize> {
    let token = token.trim();
    let digits = token.strip_prefix('S').or_else(|| token.strip_prefix('s'))?;
    let n: usize = digits.parse().ok()?;
    n.checked_sub(1)
}

/// Index into `sources` for a tag (`S2`, `[S2]`) or a literal URL.
fn resolve(candidate: &str, sources: &[String]) -> Option<usize> {
    let candidate = candidate.trim().trim_matches(|c: char| matches!(c, '[' | ']' | '(' | ')' | '"'));
    if let Some(idx) = parse_tag(candidate) {
        return Some(idx);
    }
    let normalized = candidate.trim_end_matches('/');
    sources.iter().position(|s| s.trim_end_matches('/') == normalized)
}

/// Bracketed tag groups in `text`: byte span plus zero-based source indices.
/// `[S1, S3]` is one group.
fn inline_tags(text: &str) -> Vec<(usize, usize, Vec<usize>)> {
    let mut groups = Vec::new();
    let mut search_from = 0;
    while let Some(open) = text[search_from..].find('[').map(|i| i + search_from) {
        let Some(close) = text[open..].find(']').map(|i| i + open) else { break };
        let inner = &text[open + 1..close];
        let tags: Option<Vec<usize>> = inner.split(',').map(parse_tag).collect();
        match tags {
            Some(tags) if !tags.is_empty() => {
                groups.push((open, close + 1, tags));
                search_from = close + 1;
            }
            _ => search_from = open + 1,
        }
    }
    groups
}

fn renumber(answer: &str, groups: &[(usize, usize, Vec<usize>)], cited: &[usize]) -> String {
    let mut out = String::with_capacity(answer.len());
    let mut last = 0;
    for (start, end, tags) in groups {
        out.push_str(&answer[last..*start]);
        // tags outside the retrieved set stay as written
        let numbers: Vec<String> = tags
            .iter()
            .map(|t| cited.iter().position(|c| c == t).map_or_else(|| format!("S{}", t + 1), |p| (p + 1).to_string()))
            .collect();
        let _ = write!(out, "[{}]", numbers.join(", "));
        last = *end;
    }
    out.push_str(&answer[last..]);
    out
}
