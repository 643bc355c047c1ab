use serde::Deserialize;

/// One `data:` frame of a `streamGenerateContent?alt=sse` response.
#[derive(Debug, Deserialize)]
pub(crate) struct GoogleStreamChunk {
    #[serde(default)]
    pub candidates: Vec<GoogleCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleCandidate {
    #[serde(default)]
    pub content: Option<GoogleCandidateContent>,
    #[serde(default)]
    #[allow(dead_code)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GoogleCandidateContent {
    #[serde(default)]
    pub parts: Vec<GoogleCandidatePart>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GoogleCandidatePart {
    #[serde(default)]
    pub text: Option<String>,
}

impl GoogleStreamChunk {
    /// Concatenated text of the first candidate's parts, if any.
    pub fn text(&self) -> Option<String> {
        let candidate = self.candidates.first()?;
        let content = candidate.content.as_ref()?;

        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();

        (!text.is_empty()).then_some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_chunks_parse() {
        let chunk: GoogleStreamChunk = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello"}],"role":"model"},"index":0}]}"#,
        )
        .unwrap();

        assert_eq!(chunk.text().as_deref(), Some("Hello"));
    }

    #[test]
    fn finish_chunks_may_carry_no_text() {
        let chunk: GoogleStreamChunk = serde_json::from_str(
            r#"{"candidates":[{"finishReason":"STOP","index":0}],"usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":10}}"#,
        )
        .unwrap();

        assert_eq!(chunk.text(), None);
    }
}
