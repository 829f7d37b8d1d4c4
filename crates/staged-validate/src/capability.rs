//! Decoder and prerender capabilities
//!
//! Both are supplied by the embedding application. The validator only
//! orchestrates them.

use crate::error::ValidateError;
use crate::payload::FlightPayload;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use staged_stream::StageChunks;

/// Chunk stream handed to a decoder
pub type ChunkStream = BoxStream<'static, Bytes>;

/// Stream over the chunks of one stage bucket
#[must_use]
pub fn chunk_stream(chunks: &StageChunks) -> ChunkStream {
    stream::iter(chunks.clone()).boxed()
}

/// Options forwarded to the decoder untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodeOptions {
    /// Base URL for resolving source maps
    #[serde(default)]
    pub find_source_map_url: Option<String>,
    /// Module manifest for the consuming side
    #[serde(default)]
    pub server_consumer_manifest: serde_json::Value,
}

/// Rendered HTML prelude
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prelude {
    /// Prelude text
    pub text: String,
}

/// Decodes a chunk stream into a payload
#[async_trait::async_trait]
pub trait RscDecoder: Send + Sync {
    /// Decode every chunk of `stream`
    async fn decode(
        &self,
        stream: ChunkStream,
        options: &DecodeOptions,
    ) -> Result<FlightPayload, ValidateError>;
}

/// Prerenders a payload to its static prelude
#[async_trait::async_trait]
pub trait PrerenderClient: Send + Sync {
    /// Render everything that can complete without waiting
    async fn prerender(&self, payload: FlightPayload) -> Result<Prelude, ValidateError>;
}
