//! # ctxwire
//!
//! Client-side plumbing for a code-intelligence backend: decoding its
//! streaming completion protocol and deciding which repositories may be sent
//! to it as model context.
//!
//! ## Modules
//!
//! - [`sse`]: server-sent event framing over a chunked byte stream, with
//!   UTF-8 sequences carried across reads.
//! - [`completions`]: typed `completion` / `error` / `done` events. A
//!   [`CompletionsResponseBuilder`] folds snapshot (api-version < 2) or delta
//!   (api-version >= 2) payloads, thinking fragments and tool-call fragments
//!   into cumulative output.
//! - [`context_filters`]: the [`ContextFiltersProvider`] policy engine,
//!   fed by backend include/exclude rules. It fails closed.
//! - [`cache`]: [`ResultCache`], which coalesces concurrent callers onto one
//!   fetch and cancels it only once every caller has given up.
//! - [`telemetry`]: `tracing-subscriber` setup driven by [`LoggingConfig`].
//!
//! ## Pattern semantics
//!
//! Repository patterns are regular expressions matched anywhere in the name,
//! not against the whole name. Anchor them (`^github\.com/acme/.*$`) when an
//! exact match is intended.
//!
//! ```no_run
//! use ctxwire::completions::{ProtocolEvent, completion_events};
//! use ctxwire::sse::DecoderOptions;
//! use futures::StreamExt;
//!
//! # async fn run(response: reqwest::Response) -> anyhow::Result<()> {
//! let url = url::Url::parse("https://sg.example.com/.api/completions/stream?api-version=2")?;
//! let mut events = completion_events(&url, response.bytes_stream(), DecoderOptions::default());
//! while let Some(event) = events.next().await {
//!     if let ProtocolEvent::Completion { text, .. } = event? {
//!         println!("{text}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod completions;
pub mod context_filters;
pub mod sse;
pub mod telemetry;

pub use cache::{CacheError, CacheOptions, ResultCache};
pub use completions::{
    CompletionStreamError, CompletionsResponseBuilder, FrameParseError, ProtocolEvent,
    completion_events, completion_events_from_response, parse_events,
};
pub use context_filters::{
    ContextFiltersError, ContextFiltersProvider, FilterRules, IgnoreReason, RawContextFilters,
};
pub use ctxwire_config::{CtxwireConfig, LoggingConfig};
pub use sse::{DecoderOptions, RawMessage, decode_frames};
