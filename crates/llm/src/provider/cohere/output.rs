use serde::Deserialize;

/// Cohere v2 streaming event, one per SSE frame, discriminated by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub(crate) enum CohereStreamEvent {
    MessageStart {
        #[serde(default)]
        #[allow(dead_code)]
        id: Option<String>,
    },
    ContentStart {
        #[allow(dead_code)]
        index: usize,
    },
    ContentDelta {
        #[allow(dead_code)]
        index: usize,
        delta: CohereDelta,
    },
    ContentEnd {
        #[serde(default)]
        #[allow(dead_code)]
        index: usize,
    },
    /// The model narrating its tool strategy. Accumulated, never rendered.
    ToolPlanDelta {
        delta: CohereDelta,
    },
    ToolCallStart {
        index: usize,
        delta: CohereDelta,
    },
    ToolCallDelta {
        index: usize,
        delta: CohereDelta,
    },
    ToolCallEnd {
        #[serde(default)]
        #[allow(dead_code)]
        index: usize,
    },
    MessageEnd {
        #[serde(default)]
        #[allow(dead_code)]
        delta: Option<serde_json::Value>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CohereDelta {
    #[serde(default)]
    pub message: Option<CohereDeltaMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CohereDeltaMessage {
    #[serde(default)]
    pub content: Option<CohereDeltaContent>,
    #[serde(default)]
    pub tool_plan: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<CohereToolCallDelta>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CohereDeltaContent {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CohereToolCallDelta {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<CohereFunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CohereFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}
