//! Response generation

pub mod client;
pub mod response;

pub use client::{ChatClient, GenerationRequest, Generator};
pub use response::AssistantReply;
