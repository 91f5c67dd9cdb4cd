//! Matching player noun phrases against visible entities.
//!
//! Matching is by token prefix: every word of the phrase (articles dropped)
//! must prefix-match some word of a candidate's brief. Whole-phrase exact
//! matches beat prefix matches so "gate" picks the gate even with a
//! "gatehouse key" in view.

use thornvale_domain::ids::EntityId;

use super::World;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    None,
    One(EntityId),
    /// Ambiguous: all candidates that matched equally well.
    Many(Vec<EntityId>),
}

const ARTICLES: [&str; 3] = ["a", "an", "the"];

impl World {
    /// Match a tokenized noun phrase against candidate entities.
    pub fn match_entities(&self, tokens: &[String], candidates: &[EntityId]) -> Match {
        let phrase: Vec<String> = tokens
            .iter()
            .map(|t| t.to_lowercase())
            .filter(|t| !ARTICLES.contains(&t.as_str()))
            .collect();
        if phrase.is_empty() {
            return Match::None;
        }

        let mut exact = Vec::new();
        let mut prefix = Vec::new();
        for &id in candidates {
            let Some(brief) = self.entity(id).and_then(|e| e.brief()) else {
                continue;
            };
            let words: Vec<String> = brief
                .to_lowercase()
                .split_whitespace()
                .filter(|w| !ARTICLES.contains(w))
                .map(str::to_string)
                .collect();
            if words.is_empty() {
                continue;
            }
            if phrase == words {
                exact.push(id);
                continue;
            }
            let all_prefix = phrase
                .iter()
                .all(|t| words.iter().any(|w| w.starts_with(t.as_str())));
            if all_prefix {
                prefix.push(id);
            }
        }

        let pool = if exact.is_empty() { prefix } else { exact };
        match pool.len() {
            0 => Match::None,
            1 => Match::One(pool[0]),
            _ => Match::Many(pool),
        }
    }

    /// Match within everything the avatar can see in its location.
    pub fn match_visible(&self, avatar: EntityId, tokens: &[String]) -> Match {
        let candidates = self.visible_to(avatar);
        self.match_entities(tokens, &candidates)
    }

    /// Match within the avatar's inventory.
    pub fn match_inventory(&self, avatar: EntityId, tokens: &[String]) -> Match {
        let candidates = match self.entity(avatar).and_then(|e| e.as_avatar()) {
            Some(a) => a.inventory.clone(),
            None => Vec::new(),
        };
        self.match_entities(tokens, &candidates)
    }
}
