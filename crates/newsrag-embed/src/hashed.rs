use async_trait::async_trait;
use std::hash::Hasher;
use twox_hash::XxHash64;

use newsrag_core::traits::Embedder;
use newsrag_core::Result;

/// Bag-of-words vectors from hashed, lowercased alphanumeric tokens.
///
/// Needs no model files and is fully deterministic, which makes it the
/// backend for tests and offline development.
pub struct HashedEmbedder {
    dim: usize,
    id: String,
}

impl HashedEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self { dim, id: format!("hashed:xxh64:d{}", dim) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in tokens(text) {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(token.as_bytes());
            let idx = (hasher.finish() % self.dim as u64) as usize;
            v[idx] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 { for x in &mut v { *x /= norm; } }
        v
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

#[async_trait]
impl Embedder for HashedEmbedder {
    fn embedder_id(&self) -> &str { &self.id }

    fn dim(&self) -> usize { self.dim }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punctuation_and_case_do_not_change_tokens() {
        let e = HashedEmbedder::new(64);
        assert_eq!(e.embed_text("Cats, cats!"), e.embed_text("cats cats"));
    }

    #[test]
    fn empty_text_is_the_zero_vector() {
        let e = HashedEmbedder::new(8);
        assert!(e.embed_text("  ...  ").iter().all(|x| *x == 0.0));
    }
}
