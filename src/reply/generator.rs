//! Template-based reply bodies.

use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};

/// Placeholder substituted with the chosen key phrase.
const PHRASE_PLACEHOLDER: &str = "{phrase}";

/// Line pools the generator draws from.
#[derive(Debug, Clone)]
pub struct ReplyTemplates {
    pub greetings: Vec<String>,
    /// Each entry contains `{phrase}`.
    pub questions: Vec<String>,
    pub signatures: Vec<String>,
    /// Name on the last line.
    pub closing_name: String,
}

impl ReplyTemplates {
    /// The stock pools with the given closing name.
    pub fn with_closing_name(closing_name: impl Into<String>) -> Self {
        let owned = |lines: &[&str]| lines.iter().map(|s| s.to_string()).collect();
        Self {
            greetings: owned(&["Hello,", "Hi,", "Greetings,", "Good day,"]),
            questions: owned(&[
                "I was wondering if you could elaborate on {phrase}?",
                "I am not quite sure what you mean by {phrase}. Could you try to elaborate on that?",
                "Why should I help you considering {phrase} is involved?",
            ]),
            signatures: owned(&["Regards,", "Best wishes,", "Respectfully,"]),
            closing_name: closing_name.into(),
        }
    }
}

/// Builds reply bodies from key phrases.
///
/// Each reply draws from its own random source, split off the seeded parent
/// with [`ReplyGenerator::reply_rng`]. Output depends only on the order in
/// which those sources are split, never on when replies are generated.
pub struct ReplyGenerator {
    templates: ReplyTemplates,
    parent: Mutex<StdRng>,
}

impl ReplyGenerator {
    pub fn new(templates: ReplyTemplates, rng: StdRng) -> Self {
        Self {
            templates,
            parent: Mutex::new(rng),
        }
    }

    /// Next per-reply random source.
    pub fn reply_rng(&self) -> StdRng {
        let mut parent = self.parent.lock().unwrap_or_else(PoisonError::into_inner);
        StdRng::seed_from_u64(parent.next_u64())
    }

    /// Greeting, blank line, question about one phrase, blank line,
    /// signature, closing name. Every line ends with `\n`.
    ///
    /// The phrase is picked uniformly from `phrases`. Returns `None` when
    /// there are no phrases or a template pool is empty.
    pub fn generate<R: Rng + ?Sized>(&self, phrases: &[String], rng: &mut R) -> Option<String> {
        let greeting = self.templates.greetings.choose(rng)?;
        let question = self.templates.questions.choose(rng)?;
        let phrase = phrases.get(rng.gen_range(0..phrases.len().max(1)))?;
        let signature = self.templates.signatures.choose(rng)?;

        Some(format!(
            "{greeting}\n\n{}\n\n{signature}\n{}\n",
            question.replace(PHRASE_PLACEHOLDER, phrase),
            self.templates.closing_name
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(seed: u64) -> ReplyGenerator {
        ReplyGenerator::new(
            ReplyTemplates::with_closing_name("Dana"),
            StdRng::seed_from_u64(seed),
        )
    }

    fn phrases(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    #[test]
    fn layout_is_fixed() {
        let body = generator(1).generate(&phrases(&["budget"]), &mut rng(1)).unwrap();
        let lines: Vec<&str> = body.split('\n').collect();

        assert_eq!(lines.len(), 7);
        assert!(["Hello,", "Hi,", "Greetings,", "Good day,"].contains(&lines[0]));
        assert_eq!(lines[1], "");
        assert!(lines[2].contains("budget"));
        assert_eq!(lines[3], "");
        assert!(["Regards,", "Best wishes,", "Respectfully,"].contains(&lines[4]));
        assert_eq!(lines[5], "Dana");
        assert_eq!(lines[6], "");
        assert!(body.ends_with("Dana\n"));
    }

    #[test]
    fn same_source_same_reply() {
        let input = phrases(&["budget", "deadline", "quarterly report"]);
        let gen_ = generator(0);
        for seed in 0..5 {
            assert_eq!(
                gen_.generate(&input, &mut rng(seed)),
                gen_.generate(&input, &mut rng(seed))
            );
        }
    }

    #[test]
    fn reply_sources_follow_the_parent_seed() {
        let draw = |seed| {
            let gen_ = generator(seed);
            (0..4).map(|_| gen_.reply_rng().next_u64()).collect::<Vec<_>>()
        };
        assert_eq!(draw(42), draw(42));
        assert_ne!(draw(42), draw(43));
    }

    #[test]
    fn every_phrase_can_be_chosen() {
        let input = phrases(&["alpha", "beta", "gamma"]);
        let gen_ = generator(3);
        let mut source = rng(3);
        let mut seen = [false; 3];
        for _ in 0..200 {
            let body = gen_.generate(&input, &mut source).unwrap();
            for (i, p) in input.iter().enumerate() {
                if body.contains(p.as_str()) {
                    seen[i] = true;
                }
            }
        }
        assert_eq!(seen, [true; 3]);
    }

    #[test]
    fn empty_phrases_yield_nothing() {
        assert_eq!(generator(1).generate(&[], &mut rng(1)), None);
    }

    #[test]
    fn empty_pool_yields_nothing() {
        let mut templates = ReplyTemplates::with_closing_name("Dana");
        templates.signatures.clear();
        let generator = ReplyGenerator::new(templates, rng(1));
        assert_eq!(generator.generate(&phrases(&["x"]), &mut rng(1)), None);
    }

    #[test]
    fn placeholder_fully_substituted() {
        let gen_ = generator(11);
        let mut source = rng(11);
        for _ in 0..20 {
            let body = gen_.generate(&phrases(&["budget"]), &mut source).unwrap();
            assert!(!body.contains(PHRASE_PLACEHOLDER));
        }
    }
}
