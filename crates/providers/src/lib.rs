//! Model provider implementations for chronicle.
//!
//! All providers implement the `chronicle_core::Provider` trait. One
//! OpenAI-compatible client serves both the generation and the
//! classification model; they differ only in the model name sent.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
