//! Format translation between LLM API dialects.
//!
//! Requests, responses and streaming events from one vendor's wire format
//! (OpenAI chat completions, Anthropic messages, Gemini generateContent)
//! re-express through a brand-neutral intermediate representation and come
//! out in any other supported format.
//!
//! ```text
//! source document ──▶ adapter ──▶ CoreRequest / CoreResponse / StreamEvent
//!                                          │
//! target document ◀── adapter ◀────────────┘
//! ```
//!
//! - [`ir`] defines the neutral types.
//! - [`adapters`] holds one [`DialectAdapter`] per provider.
//! - [`registry`] resolves adapters by [`Provider`].
//! - [`DocumentConverter`] translates whole requests and responses.
//! - [`StreamConverter`] drives the stateful adapters across one live
//!   stream session.
//!
//! The crate is purely computational: no I/O, no async, no environment.
//!
//! ```
//! use serde_json::json;
//! use transllm::{DocumentConverter, Provider};
//!
//! let converter = DocumentConverter::new();
//! let request = json!({
//!     "model": "gpt-4o",
//!     "messages": [{"role": "user", "content": "hi"}]
//! });
//!
//! let anthropic = converter
//!     .convert_request(&request, Provider::OpenAi, Provider::Anthropic)
//!     .unwrap();
//! assert_eq!(anthropic["messages"][0]["content"][0]["text"], "hi");
//! ```

pub mod adapter;
pub mod adapters;
pub mod aliases;
pub mod compare;
pub mod convert;
pub mod error;
pub mod ir;
pub mod registry;
pub mod stream;
pub mod token_count;

pub use adapter::DialectAdapter;
pub use adapters::{AnthropicAdapter, GeminiAdapter, OpenAiAdapter};
pub use convert::DocumentConverter;
pub use error::{Result, TransLLMError};
pub use ir::{
    ContentBlock, CoreRequest, CoreResponse, FinishReason, Message, Provider, Role, StreamEvent,
    StreamEventType, Usage,
};
pub use stream::StreamConverter;
