use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};
use crate::prompt::{Vibe, build_prompt};

/// One chat turn, in the role/content shape the upstream expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

// Inbound body. Accepts a raw message list, a prompt with optional prior
// turns, or the form fields (context + vibe) the browser page collects.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub vibe: Option<Vibe>,
    #[serde(default)]
    pub web_access: bool,
}

impl ChatRequest {
    /// Normalizes the inbound shapes into the single upstream request.
    pub fn into_generation(self) -> Result<GenerationRequest> {
        let mut messages = self.messages;

        if let Some(prompt) = self.prompt.filter(|p| !p.trim().is_empty()) {
            messages.push(Message::user(prompt));
        } else if self.context.is_some() || self.vibe.is_some() {
            let context = self.context.unwrap_or_default();
            messages.push(Message::user(build_prompt(&context, self.vibe.unwrap_or_default())));
        }

        if messages.is_empty() {
            return Err(GatewayError::BadRequest(
                "request carries no prompt or messages".to_string(),
            ));
        }

        Ok(GenerationRequest {
            messages,
            web_access: self.web_access,
        })
    }
}

// Upstream API request format
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    pub web_access: bool,
}

/// Three bio candidates, ordered by their upstream label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BioCandidates {
    pub bios: Vec<String>,
}

const CANDIDATES: usize = 3;
const LABELS: [&str; CANDIDATES] = ["1.", "2.", "3."];

impl BioCandidates {
    /// Parses an upstream body.
    ///
    /// The body is either the three-key object itself
    /// (`{"1.":"a","2.":"b","3.":"c"}`) or a `{"result": "<text>", "status": bool}`
    /// envelope. The envelope text is that object as JSON, or three blank-line
    /// separated blocks labelled `1.`, `2.` and `3.`. A `false` status is an
    /// [`GatewayError::UpstreamRejected`]; any other shape is a
    /// [`GatewayError::Parse`].
    pub fn parse(body: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(body.trim())
            .map_err(|e| GatewayError::Parse(format!("body is not JSON: {e}")))?;
        let object = match value {
            Value::Object(map) => map,
            other => return Err(GatewayError::Parse(format!("expected an object, got {other}"))),
        };

        if object.get("status") == Some(&Value::Bool(false)) {
            let reason = match object.get("result") {
                Some(Value::String(text)) if !text.trim().is_empty() => text.trim().to_string(),
                _ => "status false".to_string(),
            };
            return Err(GatewayError::UpstreamRejected(reason));
        }

        let labelled = match object.get("result") {
            Some(Value::String(text)) => match parse_inner(text) {
                Some(inner) => from_object(inner)?,
                None => from_blocks(text)?,
            },
            _ => from_object(object)?,
        };

        Ok(Self {
            bios: labelled.into_iter().map(|(_, bio)| bio).collect(),
        })
    }
}

fn from_object(object: Map<String, Value>) -> Result<Vec<(String, String)>> {
    if object.len() != CANDIDATES {
        return Err(GatewayError::Parse(format!(
            "expected {CANDIDATES} candidates, found {}",
            object.len()
        )));
    }

    let mut labelled = object
        .into_iter()
        .map(|(label, value)| match value {
            Value::String(bio) => Ok((label, bio.trim().to_string())),
            other => Err(GatewayError::Parse(format!(
                "candidate {label} is not a string: {other}"
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    labelled.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(labelled)
}

// "1. first\n\n2. second\n\n3. third", the plain-text answer shape.
fn from_blocks(text: &str) -> Result<Vec<(String, String)>> {
    let blocks: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .collect();
    if blocks.len() != CANDIDATES {
        return Err(GatewayError::Parse(format!(
            "result text is not a JSON object and has {} blocks, expected {CANDIDATES}",
            blocks.len()
        )));
    }

    let mut labelled = blocks
        .into_iter()
        .map(|block| {
            LABELS
                .iter()
                .find_map(|label| {
                    let bio = block.strip_prefix(*label)?.trim();
                    (!bio.is_empty()).then(|| (label.to_string(), bio.to_string()))
                })
                .ok_or_else(|| GatewayError::Parse(format!("unlabelled result block: {block}")))
        })
        .collect::<Result<Vec<_>>>()?;
    labelled.sort_by(|a, b| a.0.cmp(&b.0));
    labelled.dedup_by(|a, b| a.0 == b.0);
    if labelled.len() != CANDIDATES {
        return Err(GatewayError::Parse("result blocks repeat a label".to_string()));
    }
    Ok(labelled)
}

fn parse_inner(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(strip_code_fence(text)) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

// Models like to wrap JSON in ```json fences.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    match text.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => text,
    }
}
