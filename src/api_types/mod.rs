mod chat;
mod models;
mod usage;

pub use chat::{
    ChatChoice, ChatMessage, ChatRequest, ChatResponse, ChunkChoice, ChunkDelta,
    GatewayAnnotation, Role, StreamChunk, TokenUsage,
};
pub use models::{ModelInfo, ModelsResponse};
pub use usage::UsageReport;
