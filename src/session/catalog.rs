use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One "would you rather" question: two options to pick from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Prompt {
    /// Left-hand option.
    pub first: String,
    /// Right-hand option.
    pub second: String,
}

impl Prompt {
    /// Build a prompt from its two options.
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
        }
    }

    /// Whether `option` is one of the two choices.
    pub fn offers(&self, option: &str) -> bool {
        self.first == option || self.second == option
    }

    fn is_well_formed(&self) -> bool {
        !self.first.trim().is_empty() && !self.second.trim().is_empty() && self.first != self.second
    }
}

/// Ordered, immutable list of prompts; round `n` uses entry `n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptCatalog {
    prompts: Arc<[Prompt]>,
}

/// Reason a prompt list cannot be used as a catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// No prompt was supplied.
    #[error("prompt catalog must not be empty")]
    Empty,
    /// The prompt at `index` has a blank option or offers the same option twice.
    #[error("prompt #{index} needs two distinct, non-blank options")]
    Malformed { index: usize },
}

impl PromptCatalog {
    /// Validate and wrap a prompt list.
    pub fn new(prompts: Vec<Prompt>) -> Result<Self, CatalogError> {
        if prompts.is_empty() {
            return Err(CatalogError::Empty);
        }
        if let Some(index) = prompts.iter().position(|prompt| !prompt.is_well_formed()) {
            return Err(CatalogError::Malformed { index });
        }
        Ok(Self {
            prompts: prompts.into(),
        })
    }

    /// Number of rounds in a game.
    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    /// Whether the catalog has no prompts.
    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Prompt for `round`, if the round exists.
    pub fn get(&self, round: u32) -> Option<&Prompt> {
        self.prompts.get(round as usize)
    }

    /// Whether `option` is a valid pick in `round`.
    pub fn offers(&self, round: u32, option: &str) -> bool {
        self.get(round).is_some_and(|prompt| prompt.offers(option))
    }

    /// Whether `round` is the final one.
    pub fn is_last_round(&self, round: u32) -> bool {
        round as usize + 1 >= self.prompts.len()
    }
}

impl Default for PromptCatalog {
    fn default() -> Self {
        let prompts = [
            ("Apollo bagels", "Leon's bagels"),
            ("Metro", "Ferry"),
            ("Museum", "Shopping"),
            ("MoMa", "Guggenheim"),
            ("Funny Face cookies", "Crumbl cookies"),
            ("Spa experience", "Cinema"),
            ("Hotel experience", "Party experience"),
            ("Chick-fil-A", "Shake Shack"),
            ("Chill", "Sail & Sunset"),
            ("Painting", "Photo"),
        ]
        .into_iter()
        .map(|(first, second)| Prompt::new(first, second))
        .collect::<Vec<_>>();

        Self {
            prompts: prompts.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_ten_rounds() {
        let catalog = PromptCatalog::default();
        assert_eq!(catalog.len(), 10);
        assert!(catalog.offers(1, "Metro"));
        assert!(!catalog.offers(0, "Metro"));
        assert!(catalog.is_last_round(9));
        assert!(!catalog.is_last_round(8));
        assert!(catalog.get(10).is_none());
    }

    #[test]
    fn rejects_empty_and_malformed_lists() {
        assert_eq!(PromptCatalog::new(Vec::new()), Err(CatalogError::Empty));
        assert_eq!(
            PromptCatalog::new(vec![Prompt::new("Tea", "Coffee"), Prompt::new("Same", "Same")]),
            Err(CatalogError::Malformed { index: 1 })
        );
        assert_eq!(
            PromptCatalog::new(vec![Prompt::new(" ", "Coffee")]),
            Err(CatalogError::Malformed { index: 0 })
        );
    }
}
