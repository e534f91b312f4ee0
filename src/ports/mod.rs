//! Ports - async trait seams between the engine and its collaborators.
//!
//! Adapters in [`crate::adapters`] provide Redis/Postgres/HTTP-backed
//! implementations; the in-memory variants back the tests.

mod chat_store;
mod key_value_store;
mod model_provider;

pub use chat_store::{ChatStore, ChatStoreError};
pub use key_value_store::{KeyValueStore, KvError};
pub use model_provider::{
    GenerationRequest, ModelChunk, ModelError, ModelProvider, PromptMessage, TokenStream,
};
