use std::sync::Arc;

use tracing::trace;

use crate::db::WorldCache;
use crate::input::registry::{Registry, WordTag};
use crate::input::stack::{Mode, Recognition, ResolvedObjects};
use crate::model::WorldObject;
use crate::values::{Failure, ObjId};

/// Result of a Game-mode parse: a recognition, a request for the player to
/// disambiguate, or a pass to the next recognizer.
#[derive(Debug, PartialEq)]
pub enum GameOutcome {
    Recognized(Recognition),
    Disambiguate(String),
    NotRecognized,
}

/// Natural-language verb-object recognizer:
/// `<verb> [direct-object-phrase] [prep indirect-object-phrase]`.
pub struct GameRecognizer<'a> {
    pub registry: &'a Registry,
    pub cache: &'a WorldCache,
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum Scope {
    Inventory,
    Room,
    Actor,
}

struct Candidate {
    obj: Arc<WorldObject>,
    scope: Scope,
    exact: bool,
}

impl<'a> GameRecognizer<'a> {
    pub async fn recognize(
        &self,
        actor: &ObjId,
        last_interacted: Option<&ObjId>,
        line: &str,
    ) -> Result<GameOutcome, Failure> {
        // Stage 1: lexical cleanup. Case is preserved; comparisons fold.
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return Ok(GameOutcome::NotRecognized);
        }

        // Stage 2: dictionary tagging.
        let tagged: Vec<(&str, WordTag)> = words
            .iter()
            .map(|w| (*w, self.registry.tag_of(w)))
            .collect();

        // Stage 3: extraction. The first word must be a known verb.
        let (first, first_tag) = tagged[0];
        if first_tag != WordTag::Verb {
            return Ok(GameOutcome::NotRecognized);
        }
        let verb = self
            .registry
            .canonical_verb(first)
            .expect("verb tag implies dictionary entry");

        let rest = &tagged[1..];
        let prep_index = rest
            .iter()
            .position(|(_, tag)| *tag == WordTag::Preposition);
        let (direct_words, preposition, indirect_words) = match prep_index {
            Some(i) => (
                &rest[..i],
                Some(rest[i].0.to_string()),
                &rest[i + 1..],
            ),
            None => (rest, None, &rest[..0]),
        };

        let direct_phrase = noun_phrase(direct_words);
        let indirect_phrase = noun_phrase(indirect_words);

        let candidates = self.visible_objects(actor).await?;
        let direct = match self.resolve_phrase(&direct_phrase, &candidates, last_interacted) {
            Resolution::None => None,
            Resolution::One(id) => Some(id),
            Resolution::Ambiguous(names) => {
                return Ok(GameOutcome::Disambiguate(format!(
                    "Which do you mean: {}?",
                    names.join(" or ")
                )))
            }
        };
        let indirect = match self.resolve_phrase(&indirect_phrase, &candidates, last_interacted) {
            Resolution::None => None,
            Resolution::One(id) => Some(id),
            Resolution::Ambiguous(names) => {
                return Ok(GameOutcome::Disambiguate(format!(
                    "Which do you mean: {}?",
                    names.join(" or ")
                )))
            }
        };

        trace!(verb = %verb, direct = ?direct, indirect = ?indirect, "game recognition");
        let argstr = words[1..].join(" ");
        Ok(GameOutcome::Recognized(Recognition {
            mode: Mode::Game,
            verb,
            args: words[1..].iter().map(|w| w.to_string()).collect(),
            argstr,
            raw: line.to_string(),
            resolved: ResolvedObjects {
                direct,
                indirect,
                preposition,
            },
        }))
    }

    /// Objects visible to the actor: the contents of its location, its own
    /// contents (inventory), and the actor itself.
    async fn visible_objects(&self, actor: &ObjId) -> Result<Vec<(Arc<WorldObject>, Scope)>, Failure> {
        let mut out = Vec::new();
        let Some(actor_obj) = self.cache.get(actor).await? else {
            return Ok(out);
        };
        if let Some(location) = &actor_obj.location_id {
            if let Some(room) = self.cache.get(location).await? {
                for id in &room.content_ids {
                    if id == actor {
                        continue;
                    }
                    if let Some(obj) = self.cache.get(id).await? {
                        out.push((obj, Scope::Room));
                    }
                }
            }
        }
        for id in &actor_obj.content_ids {
            if let Some(obj) = self.cache.get(id).await? {
                out.push((obj, Scope::Inventory));
            }
        }
        out.push((actor_obj, Scope::Actor));
        Ok(out)
    }

    /// Matches a noun phrase against the visible set. Tie-breakers, in
    /// order: exact name over partial, inventory over room, most recently
    /// interacted with, lowest object ID. Distinctly named survivors after
    /// recency mean the intent is genuinely unclear: ask.
    fn resolve_phrase(
        &self,
        phrase: &str,
        visible: &[(Arc<WorldObject>, Scope)],
        last_interacted: Option<&ObjId>,
    ) -> Resolution {
        if phrase.is_empty() {
            return Resolution::None;
        }
        let folded = phrase.to_lowercase();

        // Pronouns point at the last interaction.
        if self.registry.tag_of(phrase) == WordTag::Pronoun {
            if let Some(last) = last_interacted {
                return Resolution::One(last.clone());
            }
            return Resolution::None;
        }

        let mut matches: Vec<Candidate> = visible
            .iter()
            .filter_map(|(obj, scope)| {
                let name = obj.name.to_lowercase();
                let exact = name == folded || obj.id.as_str().to_lowercase() == folded;
                let partial = !name.is_empty() && name.starts_with(&folded);
                (exact || partial).then(|| Candidate {
                    obj: obj.clone(),
                    scope: *scope,
                    exact,
                })
            })
            .collect();

        if matches.is_empty() {
            return Resolution::None;
        }
        if matches.iter().any(|c| c.exact) {
            matches.retain(|c| c.exact);
        }
        if matches.len() > 1 && matches.iter().any(|c| c.scope == Scope::Inventory) {
            matches.retain(|c| c.scope == Scope::Inventory);
        }
        if matches.len() > 1 {
            if let Some(last) = last_interacted {
                if matches.iter().any(|c| &c.obj.id == last) {
                    matches.retain(|c| &c.obj.id == last);
                }
            }
        }
        if matches.len() > 1 {
            let first_name = matches[0].obj.name.to_lowercase();
            if matches
                .iter()
                .all(|c| c.obj.name.to_lowercase() == first_name)
            {
                // Identically named: the lowest ID is as good an answer as
                // any.
                let winner = matches
                    .iter()
                    .min_by(|a, b| a.obj.id.cmp(&b.obj.id))
                    .expect("non-empty");
                return Resolution::One(winner.obj.id.clone());
            }
            let mut names: Vec<String> =
                matches.iter().map(|c| c.obj.name.clone()).collect();
            names.sort();
            names.dedup();
            return Resolution::Ambiguous(names);
        }
        Resolution::One(matches[0].obj.id.clone())
    }
}

enum Resolution {
    None,
    One(ObjId),
    Ambiguous(Vec<String>),
}

/// Strips articles out of a noun phrase and joins what remains.
fn noun_phrase(words: &[(&str, WordTag)]) -> String {
    words
        .iter()
        .filter(|(_, tag)| *tag != WordTag::Article)
        .map(|(w, _)| *w)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memstore::MemObjectStore;
    use crate::db::ObjectStore;

    async fn world() -> (Arc<WorldCache>, Registry) {
        let store = Arc::new(MemObjectStore::new());
        let cache = Arc::new(WorldCache::with_defaults(store as Arc<dyn ObjectStore>));

        let mut room = WorldObject::new(ObjId::new("#hall"));
        room.name = "great hall".to_string();
        let mut sword = WorldObject::new(ObjId::new("#sword-1"));
        sword.name = "rusty sword".to_string();
        sword.location_id = Some(ObjId::new("#hall"));
        let mut lamp = WorldObject::new(ObjId::new("#lamp"));
        lamp.name = "brass lamp".to_string();
        lamp.location_id = Some(ObjId::new("#hall"));
        let mut player = WorldObject::new(ObjId::new("#player"));
        player.name = "Mira".to_string();
        player.location_id = Some(ObjId::new("#hall"));
        room.content_ids.insert(sword.id.clone());
        room.content_ids.insert(lamp.id.clone());
        room.content_ids.insert(player.id.clone());

        cache.put(room).await.unwrap();
        cache.put(sword).await.unwrap();
        cache.put(lamp).await.unwrap();
        cache.put(player).await.unwrap();
        (cache, Registry::with_defaults())
    }

    #[tokio::test]
    async fn test_verb_only_command() {
        let (cache, registry) = world().await;
        let recognizer = GameRecognizer {
            registry: &registry,
            cache: &cache,
        };
        let outcome = recognizer
            .recognize(&ObjId::new("#player"), None, "look")
            .await
            .unwrap();
        let GameOutcome::Recognized(r) = outcome else {
            panic!("not recognized");
        };
        assert_eq!(r.verb, "look");
        assert_eq!(r.resolved.direct, None);
    }

    #[tokio::test]
    async fn test_verb_synonym_and_article_stripping() {
        let (cache, registry) = world().await;
        let recognizer = GameRecognizer {
            registry: &registry,
            cache: &cache,
        };
        let outcome = recognizer
            .recognize(&ObjId::new("#player"), None, "take the brass lamp")
            .await
            .unwrap();
        let GameOutcome::Recognized(r) = outcome else {
            panic!("not recognized");
        };
        assert_eq!(r.verb, "get");
        assert_eq!(r.resolved.direct, Some(ObjId::new("#lamp")));
        assert_eq!(r.args, vec!["the", "brass", "lamp"]);
    }

    #[tokio::test]
    async fn test_prepositional_phrase() {
        let (cache, registry) = world().await;
        let recognizer = GameRecognizer {
            registry: &registry,
            cache: &cache,
        };
        let outcome = recognizer
            .recognize(
                &ObjId::new("#player"),
                None,
                "put the rusty sword in the brass lamp",
            )
            .await
            .unwrap();
        let GameOutcome::Recognized(r) = outcome else {
            panic!("not recognized");
        };
        assert_eq!(r.verb, "put");
        assert_eq!(r.resolved.direct, Some(ObjId::new("#sword-1")));
        assert_eq!(r.resolved.preposition, Some("in".to_string()));
        assert_eq!(r.resolved.indirect, Some(ObjId::new("#lamp")));
    }

    #[tokio::test]
    async fn test_unknown_verb_declines() {
        let (cache, registry) = world().await;
        let recognizer = GameRecognizer {
            registry: &registry,
            cache: &cache,
        };
        assert_eq!(
            recognizer
                .recognize(&ObjId::new("#player"), None, "defenestrate lamp")
                .await
                .unwrap(),
            GameOutcome::NotRecognized
        );
    }

    #[tokio::test]
    async fn test_exact_beats_partial() {
        let (cache, registry) = world().await;
        let mut rust = WorldObject::new(ObjId::new("#rust"));
        rust.name = "rusty".to_string();
        rust.location_id = Some(ObjId::new("#hall"));
        cache.put(rust.clone()).await.unwrap();
        cache
            .update(&ObjId::new("#hall"), |o| {
                o.content_ids.insert(ObjId::new("#rust"));
            })
            .await
            .unwrap();

        let recognizer = GameRecognizer {
            registry: &registry,
            cache: &cache,
        };
        // "rusty" matches "rusty" exactly and "rusty sword" partially; the
        // exact match wins.
        let outcome = recognizer
            .recognize(&ObjId::new("#player"), None, "get rusty")
            .await
            .unwrap();
        let GameOutcome::Recognized(r) = outcome else {
            panic!("not recognized");
        };
        assert_eq!(r.resolved.direct, Some(ObjId::new("#rust")));
    }

    #[tokio::test]
    async fn test_inventory_beats_room() {
        let (cache, registry) = world().await;
        let mut pocket_lamp = WorldObject::new(ObjId::new("#pocket-lamp"));
        pocket_lamp.name = "brass lamp".to_string();
        cache.put(pocket_lamp).await.unwrap();
        cache
            .update(&ObjId::new("#player"), |o| {
                o.content_ids.insert(ObjId::new("#pocket-lamp"));
            })
            .await
            .unwrap();

        let recognizer = GameRecognizer {
            registry: &registry,
            cache: &cache,
        };
        let outcome = recognizer
            .recognize(&ObjId::new("#player"), None, "get brass lamp")
            .await
            .unwrap();
        let GameOutcome::Recognized(r) = outcome else {
            panic!("not recognized");
        };
        assert_eq!(r.resolved.direct, Some(ObjId::new("#pocket-lamp")));
    }

    #[tokio::test]
    async fn test_recency_breaks_ties_then_ambiguity_asks() {
        let (cache, registry) = world().await;
        // Two distinctly named partial matches for "br".
        let mut brick = WorldObject::new(ObjId::new("#brick"));
        brick.name = "brick".to_string();
        brick.location_id = Some(ObjId::new("#hall"));
        cache.put(brick).await.unwrap();
        cache
            .update(&ObjId::new("#hall"), |o| {
                o.content_ids.insert(ObjId::new("#brick"));
            })
            .await
            .unwrap();

        let recognizer = GameRecognizer {
            registry: &registry,
            cache: &cache,
        };
        // With recency pointing at the lamp, "br" resolves to it.
        let outcome = recognizer
            .recognize(
                &ObjId::new("#player"),
                Some(&ObjId::new("#lamp")),
                "get br",
            )
            .await
            .unwrap();
        let GameOutcome::Recognized(r) = outcome else {
            panic!("not recognized");
        };
        assert_eq!(r.resolved.direct, Some(ObjId::new("#lamp")));

        // Without recency, distinct names survive every tie-breaker.
        let outcome = recognizer
            .recognize(&ObjId::new("#player"), None, "get br")
            .await
            .unwrap();
        let GameOutcome::Disambiguate(msg) = outcome else {
            panic!("expected a disambiguation request, got {:?}", outcome);
        };
        assert!(msg.contains("brick") && msg.contains("brass lamp"));
    }

    #[tokio::test]
    async fn test_identically_named_candidates_take_lowest_id() {
        let (cache, registry) = world().await;
        let mut twin = WorldObject::new(ObjId::new("#aaa-sword"));
        twin.name = "rusty sword".to_string();
        twin.location_id = Some(ObjId::new("#hall"));
        cache.put(twin).await.unwrap();
        cache
            .update(&ObjId::new("#hall"), |o| {
                o.content_ids.insert(ObjId::new("#aaa-sword"));
            })
            .await
            .unwrap();

        let recognizer = GameRecognizer {
            registry: &registry,
            cache: &cache,
        };
        let outcome = recognizer
            .recognize(&ObjId::new("#player"), None, "get rusty sword")
            .await
            .unwrap();
        let GameOutcome::Recognized(r) = outcome else {
            panic!("not recognized");
        };
        assert_eq!(r.resolved.direct, Some(ObjId::new("#aaa-sword")));
    }

    #[tokio::test]
    async fn test_pronoun_resolves_to_last_interaction() {
        let (cache, registry) = world().await;
        let recognizer = GameRecognizer {
            registry: &registry,
            cache: &cache,
        };
        let outcome = recognizer
            .recognize(
                &ObjId::new("#player"),
                Some(&ObjId::new("#lamp")),
                "get it",
            )
            .await
            .unwrap();
        let GameOutcome::Recognized(r) = outcome else {
            panic!("not recognized");
        };
        assert_eq!(r.resolved.direct, Some(ObjId::new("#lamp")));
    }
}
