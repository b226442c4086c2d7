use crate::error::IndexError;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Produces a fixed-dimension vector for a text span.
///
/// One instance corresponds to one model: `model_id` and `dimension` are
/// constant for the instance's lifetime, and the vector index refuses to mix
/// models at load time.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn model_id(&self) -> &str;

    fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError>;

    /// Batched embedding with a bounded batch size to cap memory.
    fn embed_batch(&self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>, IndexError> {
        let batch_size = batch_size.max(1);
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            for text in batch {
                vectors.push(self.embed(text)?);
            }
        }
        Ok(vectors)
    }
}

/// Hashed character-trigram embedder, L2-normalized and fully deterministic.
/// Needs no model download, which keeps indexing self-contained and tests
/// reproducible.
#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    dimensions: usize,
    model_id: String,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            model_id: format!("char-ngram-{}", dimensions.max(1)),
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimension(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return Ok(vector);
        }

        if chars.len() < 3 {
            let token = chars.iter().collect::<String>();
            let bucket = (fnv1a(token.as_bytes()) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        } else {
            for window in chars.windows(3) {
                let token = window.iter().collect::<String>();
                let bucket = (fnv1a(token.as_bytes()) % vector.len() as u64) as usize;
                vector[bucket] += 1.0;
            }
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 1469598103934665603u64;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow").unwrap();
        let second = embedder.embed("Hydraulic pressure and flow").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder::new(32);
        let vector = embedder.embed("abc").unwrap();
        assert_eq!(vector.len(), 32);
        assert_eq!(embedder.dimension(), 32);
    }

    #[test]
    fn vectors_are_unit_length() {
        let embedder = CharacterNgramEmbedder::default();
        let vector = embedder.embed("some meaningful sentence").unwrap();
        let magnitude: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[test]
    fn very_short_text_still_embeds() {
        let embedder = CharacterNgramEmbedder::new(16);
        let vector = embedder.embed("ab").unwrap();
        assert!(vector.iter().any(|v| *v > 0.0));
    }

    #[test]
    fn batch_matches_single_embeddings() {
        let embedder = CharacterNgramEmbedder::default();
        let texts = vec![
            "first chunk".to_string(),
            "second chunk".to_string(),
            "third chunk".to_string(),
        ];
        let batched = embedder.embed_batch(&texts, 2).unwrap();
        assert_eq!(batched.len(), 3);
        for (text, vector) in texts.iter().zip(&batched) {
            assert_eq!(vector, &embedder.embed(text).unwrap());
        }
    }

    #[test]
    fn model_id_tracks_dimension() {
        assert_eq!(CharacterNgramEmbedder::new(64).model_id(), "char-ngram-64");
    }
}
