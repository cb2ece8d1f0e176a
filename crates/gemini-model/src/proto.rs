use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use palaver_model::{
    ErrorKind, ModelContent, ModelFinishReason, ModelPart, ModelRequest,
};
use serde::{Deserialize, Serialize};

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentChunk {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
    pub error: Option<Status>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<CandidateContent>,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CandidatePart {
    pub text: Option<String>,
    /// Set on thought summaries, which are not part of the reply.
    #[serde(default)]
    pub thought: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Status {
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
    pub status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ErrorEnvelope {
    pub error: Status,
}

impl GenerateContentChunk {
    /// Concatenates the reply text of the first candidate.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter(|p| !p.thought)
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() { None } else { Some(text) }
    }

    pub fn finish_reason(&self) -> Option<ModelFinishReason> {
        let reason = self.candidates.first()?.finish_reason.as_deref()?;
        Some(map_finish_reason(reason))
    }

    /// Returns the block reason when the prompt itself was refused.
    pub fn block_reason(&self) -> Option<&str> {
        if !self.candidates.is_empty() {
            return None;
        }
        self.prompt_feedback.as_ref()?.block_reason.as_deref()
    }
}

#[inline]
fn map_finish_reason(reason: &str) -> ModelFinishReason {
    match reason {
        "STOP" => ModelFinishReason::Stop,
        "MAX_TOKENS" => ModelFinishReason::MaxTokens,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT"
        | "SPII" | "IMAGE_SAFETY" => ModelFinishReason::Safety,
        _ => ModelFinishReason::Other,
    }
}

#[inline]
pub fn error_kind_for_status(code: u16) -> ErrorKind {
    match code {
        429 => ErrorKind::RateLimitExceeded,
        400 | 404 | 413 | 422 => ErrorKind::InvalidRequest,
        _ => ErrorKind::Other,
    }
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

// -----------
// Conversions
// -----------

#[inline]
pub fn create_request(req: &ModelRequest) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: req.contents.iter().map(create_content).collect(),
        system_instruction: req.system_instruction.as_ref().map(|text| {
            Content {
                role: None,
                parts: vec![Part::Text { text: text.clone() }],
            }
        }),
    }
}

#[inline]
fn create_content(content: &ModelContent) -> Content {
    Content {
        role: Some(content.role.as_str()),
        parts: content.parts.iter().map(create_part).collect(),
    }
}

#[inline]
fn create_part(part: &ModelPart) -> Part {
    match part {
        ModelPart::Text(text) => Part::Text { text: text.clone() },
        ModelPart::Binary { mime_type, data } => Part::InlineData {
            inline_data: InlineData {
                mime_type: mime_type.clone(),
                data: STANDARD.encode(data),
            },
        },
    }
}
