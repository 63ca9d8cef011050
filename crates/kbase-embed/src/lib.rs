//! Embedding clients.
//!
//! `HttpEmbedder` talks to a remote OpenAI-compatible service; `HashedEmbedder`
//! is a deterministic local stand-in selected with `embedding.use_fake` or
//! `APP_USE_FAKE_EMBEDDINGS=1`.

mod hashed;
mod http;

pub use hashed::HashedEmbedder;
pub use http::HttpEmbedder;

use kbase_core::config::EmbeddingSettings;
use kbase_core::error::Result;
use kbase_core::traits::Embedder;
use tracing::info;

pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Box<dyn Embedder>> {
    let use_fake = settings.use_fake
        || std::env::var("APP_USE_FAKE_EMBEDDINGS")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
    if use_fake {
        info!(dim = settings.fake_dim, "using hashed embedder");
        return Ok(Box::new(HashedEmbedder::new(settings.fake_dim)));
    }
    info!(model = %settings.model, url = %settings.base_url, "using remote embedder");
    Ok(Box::new(HttpEmbedder::new(settings)?))
}
