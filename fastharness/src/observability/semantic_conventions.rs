//! Span and attribute names used by the harness.
//!
//! Span names follow the GenAI semantic conventions where one exists.

pub mod span {
    /// One submission of a task.
    pub const INVOKE_AGENT: &str = "invoke_agent";

    /// The runtime call made for one submission.
    pub const CHAT: &str = "chat";

    /// A tool invocation reported by the runtime.
    pub const EXECUTE_TOOL: &str = "execute_tool";

    pub const SESSION_SWEEP: &str = "fastharness.session.sweep";
}

pub mod attr {
    pub const OPERATION_NAME: &str = "gen_ai.operation.name";
    pub const REQUEST_MODEL: &str = "gen_ai.request.model";
    pub const CONVERSATION_ID: &str = "gen_ai.conversation.id";
    pub const USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
    pub const USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
    pub const TOOL_NAME: &str = "gen_ai.tool.name";
    pub const TOOL_CALL_ID: &str = "gen_ai.tool.call.id";

    pub const TASK_ID: &str = "task.id";
    pub const CONTEXT_ID: &str = "context.id";
    pub const TASK_STATE: &str = "task.state";
    pub const COST_USD: &str = "fastharness.cost_usd";
}
