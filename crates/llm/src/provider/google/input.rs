use protocol::{Request, Role};
use serde::Serialize;

/// Google `streamGenerateContent` request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleRequest {
    pub contents: Vec<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

impl GoogleRequest {
    /// The vendor API has neither a system nor a tool role; system content
    /// folds into the first user turn.
    pub fn from_request(request: &Request) -> Self {
        let mut system = String::new();
        let mut contents: Vec<GoogleContent> = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(&message.content);
                }
                Role::Assistant => contents.push(GoogleContent {
                    role: "model",
                    parts: vec![GooglePart {
                        text: message.content.clone(),
                    }],
                }),
                Role::User | Role::Tool => contents.push(GoogleContent {
                    role: "user",
                    parts: vec![GooglePart {
                        text: message.content.clone(),
                    }],
                }),
            }
        }

        if !system.is_empty() {
            match contents.iter_mut().find(|content| content.role == "user") {
                Some(first_user) => {
                    let prompt = std::mem::take(&mut first_user.parts[0].text);
                    first_user.parts[0].text = format!("{system}\n\n{prompt}");
                }
                None => contents.insert(
                    0,
                    GoogleContent {
                        role: "user",
                        parts: vec![GooglePart { text: system }],
                    },
                ),
            }
        }

        let generation_config = GenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop.clone(),
        };

        Self {
            contents,
            generation_config: generation_config
                .is_set()
                .then_some(generation_config),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct GoogleContent {
    pub role: &'static str,
    pub parts: Vec<GooglePart>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct GooglePart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl GenerationConfig {
    fn is_set(&self) -> bool {
        self.temperature.is_some()
            || self.top_p.is_some()
            || self.top_k.is_some()
            || self.max_output_tokens.is_some()
            || !self.stop_sequences.is_empty()
    }
}
