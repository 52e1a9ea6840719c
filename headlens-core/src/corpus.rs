//! The probe corpus: a fixed set of sentences covering diverse linguistic
//! patterns, run through the model to characterize every head.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An ordered, content-hashed sentence corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Corpus {
    sentences: Vec<String>,
}

impl Corpus {
    /// The canonical probe set: subject-verb agreement,
    /// coreference, negation, questions, passive voice, relative clauses,
    /// conjunctions, prepositional phrases, comparatives, temporal markers,
    /// causation, conditionals, modals, possession, quantities, idioms,
    /// and technical register.
    pub fn canonical() -> Self {
        let sentences = [
            // Subject-verb agreement
            "The cat sits on the mat.",
            "The cats sit on the mat.",
            "She sells seashells by the seashore.",
            // Pronouns and coreference
            "The animal didn't cross the street because it was too tired.",
            "The street was blocked because it was under construction.",
            "John gave Mary a book. She thanked him.",
            // Negation
            "I do not like green eggs and ham.",
            "She never goes to the park.",
            "Nobody knows the trouble I've seen.",
            // Questions
            "What is the meaning of life?",
            "Where did you go yesterday?",
            "How does a transformer work?",
            // Passive voice
            "The ball was thrown by the boy.",
            "The cake was eaten by the children.",
            // Relative clauses
            "The book that I read was interesting.",
            "The person who called didn't leave a message.",
            // Conjunctions
            "I like apples and oranges.",
            "She is smart but lazy.",
            "You can have tea or coffee.",
            // Prepositional phrases
            "The cat under the table is sleeping.",
            "We walked through the forest.",
            "She arrived before noon.",
            // Comparatives
            "This is better than that.",
            "She is taller than her brother.",
            "The fastest runner won the race.",
            // Temporal
            "Yesterday I went to the store.",
            "Tomorrow will be sunny.",
            "I have been waiting for hours.",
            // Causation
            "Because it rained, the game was cancelled.",
            "The plant died from lack of water.",
            // Conditionals
            "If it rains, we will stay inside.",
            "I would go if I had time.",
            // Modals
            "You should eat your vegetables.",
            "She might come to the party.",
            "We must finish this today.",
            // Possession
            "This is John's book.",
            "The dog's tail wagged.",
            // Numbers and quantities
            "I have three apples.",
            "There are many people here.",
            "She bought a few items.",
            // Idioms
            "It's raining cats and dogs.",
            "Break a leg!",
            "The ball is in your court.",
            // Technical/Complex
            "The mitochondria is the powerhouse of the cell.",
            "Quantum mechanics describes subatomic particles.",
            "Machine learning models learn from data.",
        ];
        Self {
            sentences: sentences.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Build a corpus from caller-supplied sentences.
    pub fn from_sentences<I, S>(sentences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sentences: sentences.into_iter().map(Into::into).collect(),
        }
    }

    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// Order-sensitive sha256 over the sentence texts. Feeds the cache key,
    /// so editing a single sentence forces recomputation.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for sentence in &self.sentences {
            hasher.update(sentence.as_bytes());
            hasher.update([0u8]); // separator so concatenations cannot collide
        }
        format!("{:x}", hasher.finalize())
    }
}

impl Default for Corpus {
    fn default() -> Self {
        Self::canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_corpus_size() {
        assert_eq!(Corpus::canonical().len(), 46);
    }

    #[test]
    fn test_content_hash_changes_with_one_sentence() {
        let a = Corpus::from_sentences(["The cat sat.", "The dog ran."]);
        let b = Corpus::from_sentences(["The cat sat.", "The dog walked."]);
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_content_hash_is_order_sensitive() {
        let a = Corpus::from_sentences(["one", "two"]);
        let b = Corpus::from_sentences(["two", "one"]);
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_content_hash_stable() {
        let a = Corpus::canonical();
        assert_eq!(a.content_hash(), Corpus::canonical().content_hash());
    }
}
