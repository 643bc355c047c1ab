//! The adapter-facing streaming contract and the per-turn accumulation
//! state shared by every provider adapter.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use protocol::{Chunk, Message, ToolCall, ToolCallStatus, ToolCaller};

use crate::error::LlmError;

/// Consecutive contentless frames tolerated before the stream is declared
/// broken. Misbehaving upstreams that ping forever fail fast instead of
/// hanging the invocation.
pub(crate) const MAX_EMPTY_FRAMES: u32 = 300;

/// Error for a single `current()` read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The current event carries no visible text; skip it silently.
    #[error("no content")]
    NoContent,
    /// The stream failed mid-turn.
    #[error("{0}")]
    Broken(String),
}

/// A streaming turn cursor.
///
/// One consumer drives `next()`/`current()` until `next()` returns `false`,
/// then calls `call_tools()`; a non-empty status list means the adapter has
/// queued tool results and `next()` will open a continued turn.
#[async_trait]
pub trait ChatStream: Send {
    /// Advance to the next chunk. `false` when the current turn is done.
    async fn next(&mut self) -> bool;

    /// The current chunk's text, or [`StreamError::NoContent`] for a control
    /// event.
    fn current(&self) -> Result<Chunk, StreamError>;

    /// Invoke every tool call accumulated in the just-ended turn, in
    /// emission order. Appends the tool responses to the transcript and
    /// prepares a fresh underlying stream.
    async fn call_tools(&mut self) -> Vec<ToolCallStatus>;

    /// The protocol-neutral transcript, including the freshly accumulated
    /// assistant turn and any tool results.
    fn messages(&self) -> Vec<Message>;

    /// Drop the underlying stream. Afterwards `next()` returns `false` and
    /// `current()` reports no content.
    fn close(&mut self);

    /// Terminal stream error, if any.
    fn err(&self) -> Option<&LlmError>;
}

/// Builds one tool call from incrementally streamed deltas.
#[derive(Debug, Default, Clone)]
pub(crate) struct ToolCallBuilder {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallBuilder {
    pub fn into_call(self) -> ToolCall {
        ToolCall::new(self.id, self.name, self.arguments)
    }
}

/// Accumulation state for the turn currently being streamed, plus the
/// protocol-side transcript.
pub(crate) struct TurnState {
    transcript: Vec<Message>,
    content: String,
    tool_plan: String,
    builders: BTreeMap<usize, ToolCallBuilder>,
    pending_calls: Vec<ToolCall>,
    current: Result<Chunk, StreamError>,
    empty_frames: u32,
    closed: bool,
    error: Option<LlmError>,
}

impl TurnState {
    pub fn new(history: Vec<Message>) -> Self {
        Self {
            transcript: history,
            content: String::new(),
            tool_plan: String::new(),
            builders: BTreeMap::new(),
            pending_calls: Vec::new(),
            current: Err(StreamError::NoContent),
            empty_frames: 0,
            closed: false,
            error: None,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.closed && self.error.is_none()
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.current = Err(StreamError::NoContent);
    }

    pub fn fail(&mut self, error: LlmError) {
        self.current = Err(StreamError::Broken(error.to_string()));
        self.error = Some(error);
    }

    pub fn error(&self) -> Option<&LlmError> {
        self.error.as_ref()
    }

    pub fn current(&self) -> Result<Chunk, StreamError> {
        self.current.clone()
    }

    /// Record a text fragment as the current chunk.
    pub fn push_text(&mut self, text: &str) {
        self.empty_frames = 0;
        self.content.push_str(text);
        self.current = Ok(Chunk::from(text.to_string()));
    }

    /// Record a contentless frame. Returns `false` once the consecutive cap
    /// is blown, at which point the state already carries the error.
    pub fn push_empty(&mut self) -> bool {
        self.empty_frames += 1;

        if self.empty_frames > MAX_EMPTY_FRAMES {
            self.fail(LlmError::Stream(format!(
                "upstream sent {MAX_EMPTY_FRAMES} consecutive empty frames"
            )));
            return false;
        }

        self.current = Err(StreamError::NoContent);
        true
    }

    pub fn push_tool_plan(&mut self, text: &str) {
        self.tool_plan.push_str(text);
    }

    /// Start accumulating a call at the vendor's block/choice index.
    pub fn builder_at(&mut self, index: usize) -> &mut ToolCallBuilder {
        self.builders.entry(index).or_default()
    }

    /// Whether a call is already being accumulated at `index`.
    pub fn has_builder(&self, index: usize) -> bool {
        self.builders.contains_key(&index)
    }

    /// Seal the turn: fold the accumulated text and tool calls into one
    /// assistant message, append it to the transcript, and stage the calls
    /// for `call_tools`. Returns a copy of the assistant message so the
    /// adapter can mirror it into its vendor-side request.
    pub fn finish_turn(&mut self) -> Message {
        let calls: Vec<ToolCall> = std::mem::take(&mut self.builders)
            .into_values()
            .map(ToolCallBuilder::into_call)
            .collect();

        let message = Message {
            role: protocol::Role::Assistant,
            content: std::mem::take(&mut self.content),
            tool_calls: calls.clone(),
            tool_plan: std::mem::take(&mut self.tool_plan),
        };

        self.transcript.push(message.clone());
        self.pending_calls = calls;
        self.empty_frames = 0;
        self.current = Err(StreamError::NoContent);

        message
    }

    /// The calls staged by the last `finish_turn`, cleared for the next one.
    pub fn take_pending_calls(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.pending_calls)
    }

    pub fn push_transcript(&mut self, message: Message) {
        self.transcript.push(message);
    }

    pub fn transcript(&self) -> Vec<Message> {
        self.transcript.clone()
    }
}

/// Run the staged tool calls sequentially, in emission order, producing the
/// protocol-side tool-result messages and the user-visible statuses.
///
/// A failed call does not abort the turn: the error text becomes the tool's
/// response with `is_error` set, and the model gets to react to it.
pub(crate) async fn run_tool_calls(
    calls: Vec<ToolCall>,
    caller: Option<&Arc<dyn ToolCaller>>,
) -> (Vec<Message>, Vec<ToolCallStatus>) {
    let mut messages = Vec::with_capacity(calls.len());
    let mut statuses = Vec::with_capacity(calls.len());

    for mut call in calls {
        if call.function.arguments.trim().is_empty() {
            call.function.arguments = "{}".to_string();
        }

        let name = call.function.name.clone();

        let outcome = match caller {
            Some(caller) => caller.call(&name, &call.function.arguments).await,
            None => Err(protocol::ToolError(
                "no tool servers are configured".to_string(),
            )),
        };

        match outcome {
            Ok(content) => {
                messages.push(Message::tool_result(call, content, false));
                statuses.push(ToolCallStatus { name, error: None });
            }
            Err(err) => {
                messages.push(Message::tool_result(call, err.0.clone(), true));
                statuses.push(ToolCallStatus {
                    name,
                    error: Some(err.0),
                });
            }
        }
    }

    (messages, statuses)
}
