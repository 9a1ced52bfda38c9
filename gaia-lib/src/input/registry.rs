use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WordTag {
    Verb,
    Noun,
    Preposition,
    Article,
    Pronoun,
}

lazy_static! {
    static ref DEFAULT_WORDS: Vec<(&'static str, WordTag)> = {
        let mut words = Vec::new();
        for article in ["a", "an", "the"] {
            words.push((article, WordTag::Article));
        }
        for pronoun in ["it", "them", "him", "her", "me", "self"] {
            words.push((pronoun, WordTag::Pronoun));
        }
        for prep in [
            "in", "on", "at", "to", "with", "from", "under", "behind", "into", "onto", "through",
            "inside",
        ] {
            words.push((prep, WordTag::Preposition));
        }
        words
    };
    static ref DEFAULT_VERBS: Vec<(&'static str, &'static [&'static str])> = vec![
        ("look", &["l", "examine", "x"]),
        ("get", &["take", "grab"]),
        ("drop", &[]),
        ("put", &[]),
        ("give", &[]),
        ("go", &["walk"]),
        ("say", &[]),
        ("open", &[]),
        ("close", &[]),
        ("read", &[]),
        ("inventory", &["i", "inv"]),
    ];
}

pub const DEFAULT_USER_COMMANDS: &[&str] = &["who", "quit", "connect", "commands", "create"];
pub const DEFAULT_ADMIN_COMMANDS: &[&str] = &[
    "create", "delete", "reload", "shutdown", "password", "roles", "eval", "who",
];

/// Command tables and the Game-mode dictionary. Every reader takes an
/// immutable snapshot; registration clones, extends, and swaps the snapshot
/// in, so recognizers never see a half-applied update.
pub struct Registry {
    user_commands: RwLock<Arc<HashSet<String>>>,
    admin_commands: RwLock<Arc<HashSet<String>>>,
    verbs: RwLock<Arc<HashMap<String, String>>>,
    words: RwLock<Arc<HashMap<String, WordTag>>>,
}

fn swap_snapshot<T: Clone>(slot: &RwLock<Arc<T>>, mutate: impl FnOnce(&mut T)) {
    let mut guard = slot.write().unwrap();
    let mut next = (**guard).clone();
    mutate(&mut next);
    *guard = Arc::new(next);
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Registry {
    pub fn with_defaults() -> Self {
        let mut verbs = HashMap::new();
        let mut words = HashMap::new();
        for (word, tag) in DEFAULT_WORDS.iter() {
            words.insert(word.to_string(), *tag);
        }
        for (canonical, synonyms) in DEFAULT_VERBS.iter() {
            verbs.insert(canonical.to_string(), canonical.to_string());
            for synonym in synonyms.iter() {
                verbs.insert(synonym.to_string(), canonical.to_string());
            }
        }
        Self {
            user_commands: RwLock::new(Arc::new(
                DEFAULT_USER_COMMANDS.iter().map(|c| c.to_string()).collect(),
            )),
            admin_commands: RwLock::new(Arc::new(
                DEFAULT_ADMIN_COMMANDS.iter().map(|c| c.to_string()).collect(),
            )),
            verbs: RwLock::new(Arc::new(verbs)),
            words: RwLock::new(Arc::new(words)),
        }
    }

    pub fn user_commands(&self) -> Arc<HashSet<String>> {
        self.user_commands.read().unwrap().clone()
    }

    pub fn admin_commands(&self) -> Arc<HashSet<String>> {
        self.admin_commands.read().unwrap().clone()
    }

    pub fn verbs(&self) -> Arc<HashMap<String, String>> {
        self.verbs.read().unwrap().clone()
    }

    pub fn words(&self) -> Arc<HashMap<String, WordTag>> {
        self.words.read().unwrap().clone()
    }

    pub fn register_user_command(&self, word: &str) {
        let word = word.to_lowercase();
        swap_snapshot(&self.user_commands, |t| {
            t.insert(word);
        });
    }

    pub fn register_admin_command(&self, word: &str) {
        let word = word.to_lowercase();
        swap_snapshot(&self.admin_commands, |t| {
            t.insert(word);
        });
    }

    /// Registers a Game-mode verb and its synonyms, all mapping to the
    /// canonical form the binder searches for (`cmd_<canonical>`).
    pub fn register_verb(&self, canonical: &str, synonyms: &[String]) {
        let canonical = canonical.to_lowercase();
        let synonyms: Vec<String> = synonyms.iter().map(|s| s.to_lowercase()).collect();
        swap_snapshot(&self.verbs, |t| {
            t.insert(canonical.clone(), canonical.clone());
            for synonym in &synonyms {
                t.insert(synonym.clone(), canonical.clone());
            }
        });
    }

    pub fn register_word(&self, tag: WordTag, word: &str) {
        let word = word.to_lowercase();
        swap_snapshot(&self.words, |t| {
            t.insert(word, tag);
        });
    }

    /// Dictionary lookup: registered verbs first, then tagged words,
    /// untagged words default to nouns. Case-insensitive.
    pub fn tag_of(&self, word: &str) -> WordTag {
        let folded = word.to_lowercase();
        if self.verbs().contains_key(&folded) {
            return WordTag::Verb;
        }
        self.words()
            .get(&folded)
            .copied()
            .unwrap_or(WordTag::Noun)
    }

    pub fn canonical_verb(&self, word: &str) -> Option<String> {
        self.verbs().get(&word.to_lowercase()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tables() {
        let registry = Registry::with_defaults();
        assert!(registry.user_commands().contains("who"));
        assert!(registry.admin_commands().contains("eval"));
        assert_eq!(registry.canonical_verb("TAKE"), Some("get".to_string()));
        assert_eq!(registry.tag_of("the"), WordTag::Article);
        assert_eq!(registry.tag_of("sword"), WordTag::Noun);
        assert_eq!(registry.tag_of("Look"), WordTag::Verb);
    }

    #[test]
    fn test_registration_swaps_snapshot() {
        let registry = Registry::with_defaults();
        let before = registry.verbs();
        registry.register_verb("sing", &["croon".to_string()]);
        assert!(!before.contains_key("sing"));
        assert_eq!(registry.canonical_verb("croon"), Some("sing".to_string()));
        registry.register_word(WordTag::Preposition, "beneath");
        assert_eq!(registry.tag_of("beneath"), WordTag::Preposition);
    }
}
