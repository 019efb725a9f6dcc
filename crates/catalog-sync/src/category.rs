use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::item::SyncMode;
use crate::store::{CategoryRef, CategoryTerm, StoreError, TaxonomyStore};

/// Fixed categories triggered by a marker character in an item's
/// description rather than by its declared category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpecialCategory {
    Specials,
    BackInStock,
    New,
}

impl SpecialCategory {
    pub const ALL: [SpecialCategory; 3] = [Self::Specials, Self::BackInStock, Self::New];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Specials => "Specials",
            Self::BackInStock => "Back In Stock",
            Self::New => "New Arrivals",
        }
    }

    pub fn marker(&self) -> char {
        match self {
            Self::Specials => '*',
            Self::BackInStock => '^',
            Self::New => '+',
        }
    }

    pub fn from_marker(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|special| special.marker() == c)
    }

    pub fn is_special_name(name: &str) -> bool {
        Self::ALL.iter().any(|special| special.name() == name)
    }

    /// Every special category whose marker appears in `text`.
    pub fn detect(text: &str) -> Vec<SpecialCategory> {
        Self::ALL
            .into_iter()
            .filter(|special| text.contains(special.marker()))
            .collect()
    }
}

/// What to do with an item whose declared category matches nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryPolicy {
    /// Leave the item unassigned. New products are not created.
    #[default]
    Strict,
    /// File the item under the fallback category.
    Lenient,
}

/// Categories resolved for a single item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedCategories {
    pub primary: Option<CategoryRef>,
    pub specials: Vec<CategoryRef>,
}

impl ResolvedCategories {
    pub fn is_unmatched(&self) -> bool {
        self.primary.is_none()
    }

    /// Primary first, then specials, without duplicates.
    pub fn terms(&self) -> Vec<CategoryRef> {
        let mut terms: Vec<CategoryRef> = self.primary.into_iter().collect();
        for special in &self.specials {
            if !terms.contains(special) {
                terms.push(*special);
            }
        }
        terms
    }
}

/// Maps declared catalog categories onto local taxonomy terms.
///
/// Regular categories are kept in taxonomy creation order, so when several
/// names match partially the oldest one wins. That ordering is stable for
/// stores that list in creation order and arbitrary for those that do not.
pub struct CategoryResolver {
    taxonomy: Arc<dyn TaxonomyStore>,
    mode: SyncMode,
    policy: CategoryPolicy,
    fallback_name: String,
    special: HashMap<SpecialCategory, CategoryRef>,
    regular: Vec<CategoryTerm>,
    fallback: Option<CategoryRef>,
}

impl CategoryResolver {
    pub fn new(
        taxonomy: Arc<dyn TaxonomyStore>,
        mode: SyncMode,
        policy: CategoryPolicy,
        fallback_name: impl Into<String>,
    ) -> Self {
        Self {
            taxonomy,
            mode,
            policy,
            fallback_name: fallback_name.into(),
            special: HashMap::new(),
            regular: Vec::new(),
            fallback: None,
        }
    }

    async fn find_or_create(&self, name: &str) -> Result<CategoryTerm, StoreError> {
        if let Some(term) = self.taxonomy.find_category_by_name(name).await? {
            return Ok(term);
        }
        tracing::info!(category = name, "creating category");
        match self.taxonomy.create_category(name).await {
            Ok(term) => Ok(term),
            // Someone else created it between our lookup and insert.
            Err(StoreError::Conflict(_)) => self
                .taxonomy
                .find_category_by_name(name)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("category {name}"))),
            Err(e) => Err(e),
        }
    }

    /// Make sure every special category exists and return their terms.
    pub async fn ensure_special_categories(
        &mut self,
    ) -> Result<HashMap<SpecialCategory, CategoryRef>, StoreError> {
        for special in SpecialCategory::ALL {
            let term = self.find_or_create(special.name()).await?;
            self.special.insert(special, term.id);
        }
        Ok(self.special.clone())
    }

    /// Load the existing regular categories and, in full-sync mode, create
    /// any of `names` not yet present. Returns the resulting name → term map.
    pub async fn ensure_regular_categories<I, S>(
        &mut self,
        names: I,
    ) -> Result<HashMap<String, CategoryRef>, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.regular = self
            .taxonomy
            .list_categories()
            .await?
            .into_iter()
            .filter(|term| !SpecialCategory::is_special_name(&term.name))
            .collect();

        if self.mode.is_full() {
            for name in names {
                let name = name.as_ref().trim();
                if name.is_empty()
                    || SpecialCategory::is_special_name(name)
                    || self.regular.iter().any(|term| term.name == name)
                {
                    continue;
                }
                let term = self.find_or_create(name).await?;
                self.regular.push(term);
            }
        }

        if self.policy == CategoryPolicy::Lenient {
            let existing = self
                .regular
                .iter()
                .find(|term| term.name == self.fallback_name)
                .map(|term| term.id);
            self.fallback = match existing {
                Some(id) => Some(id),
                None if self.mode.is_full() => {
                    let term = self.find_or_create(&self.fallback_name).await?;
                    let id = term.id;
                    self.regular.push(term);
                    Some(id)
                }
                None => None,
            };
        }

        Ok(self
            .regular
            .iter()
            .map(|term| (term.name.clone(), term.id))
            .collect())
    }

    /// Whether `name` is already a known regular category.
    pub fn knows(&self, name: &str) -> bool {
        let name = name.trim();
        name.is_empty()
            || SpecialCategory::is_special_name(name)
            || self.regular.iter().any(|term| term.name == name)
    }

    /// Whether `declared` resolves to a regular category without the
    /// fallback.
    pub fn matches(&self, declared: &str) -> bool {
        self.match_regular(declared).is_some()
    }

    fn match_regular(&self, declared: &str) -> Option<CategoryRef> {
        let declared = declared.trim();
        if declared.is_empty() {
            return None;
        }

        if let Some(term) = self.regular.iter().find(|term| term.name == declared) {
            return Some(term.id);
        }

        let wanted = declared.to_lowercase();
        self.regular
            .iter()
            .find(|term| {
                let known = term.name.to_lowercase();
                !known.is_empty() && (known.contains(&wanted) || wanted.contains(&known))
            })
            .map(|term| term.id)
    }

    /// Resolve an item's declared category plus any special categories
    /// signalled by markers in `marker_text`.
    pub fn resolve(&self, declared: &str, marker_text: &str) -> ResolvedCategories {
        let primary = self.match_regular(declared).or(match self.policy {
            CategoryPolicy::Strict => None,
            CategoryPolicy::Lenient => self.fallback,
        });

        let specials = SpecialCategory::detect(marker_text)
            .into_iter()
            .filter_map(|special| self.special.get(&special).copied())
            .collect();

        ResolvedCategories { primary, specials }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemoryTaxonomyStore;

    fn resolver_with(
        names: &[&str],
        mode: SyncMode,
        policy: CategoryPolicy,
    ) -> (CategoryResolver, Arc<InMemoryTaxonomyStore>) {
        let taxonomy = Arc::new(InMemoryTaxonomyStore::with_categories(names));
        let resolver = CategoryResolver::new(
            Arc::clone(&taxonomy) as Arc<dyn TaxonomyStore>,
            mode,
            policy,
            "Uncategorized",
        );
        (resolver, taxonomy)
    }

    #[test]
    fn detects_markers() {
        assert_eq!(
            SpecialCategory::detect("*Great deal+"),
            vec![SpecialCategory::Specials, SpecialCategory::New]
        );
        assert!(SpecialCategory::detect("plain").is_empty());
    }

    #[tokio::test]
    async fn special_categories_created_once() {
        let (mut resolver, taxonomy) = resolver_with(&[], SyncMode::Full, CategoryPolicy::Strict);
        let first = resolver.ensure_special_categories().await.unwrap();
        let second = resolver.ensure_special_categories().await.unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert_eq!(taxonomy.names().len(), 3);
    }

    #[tokio::test]
    async fn exact_match_wins_over_partial() {
        let (mut resolver, _) = resolver_with(
            &["Wooden Widgets", "Widgets"],
            SyncMode::Full,
            CategoryPolicy::Strict,
        );
        let map = resolver.ensure_regular_categories(Vec::<String>::new()).await.unwrap();

        let resolved = resolver.resolve("Widgets", "");
        assert_eq!(resolved.primary, Some(map["Widgets"]));
    }

    #[tokio::test]
    async fn partial_match_falls_back_in_either_direction() {
        let (mut resolver, _) = resolver_with(
            &["Wooden Widgets", "Tools"],
            SyncMode::Full,
            CategoryPolicy::Strict,
        );
        let map = resolver.ensure_regular_categories(Vec::<String>::new()).await.unwrap();

        assert_eq!(
            resolver.resolve("widgets", "").primary,
            Some(map["Wooden Widgets"])
        );
        assert_eq!(
            resolver.resolve("Power Tools", "").primary,
            Some(map["Tools"])
        );
    }

    #[tokio::test]
    async fn empty_declared_category_never_matches() {
        let (mut resolver, _) = resolver_with(&["Tools"], SyncMode::Full, CategoryPolicy::Strict);
        resolver.ensure_regular_categories(Vec::<String>::new()).await.unwrap();
        assert!(resolver.resolve("  ", "").is_unmatched());
    }

    #[tokio::test]
    async fn strict_policy_leaves_unmatched() {
        let (mut resolver, _) = resolver_with(&["Tools"], SyncMode::Full, CategoryPolicy::Strict);
        resolver.ensure_regular_categories(Vec::<String>::new()).await.unwrap();
        assert!(resolver.resolve("Garden", "").is_unmatched());
    }

    #[tokio::test]
    async fn lenient_policy_uses_fallback() {
        let (mut resolver, taxonomy) =
            resolver_with(&["Tools"], SyncMode::Full, CategoryPolicy::Lenient);
        let map = resolver.ensure_regular_categories(Vec::<String>::new()).await.unwrap();

        assert!(taxonomy.names().contains(&"Uncategorized".to_owned()));
        assert_eq!(
            resolver.resolve("Garden", "").primary,
            Some(map["Uncategorized"])
        );
    }

    #[tokio::test]
    async fn partial_mode_never_creates_categories() {
        let (mut resolver, taxonomy) =
            resolver_with(&["Tools"], SyncMode::Partial, CategoryPolicy::Lenient);
        let map = resolver
            .ensure_regular_categories(["Garden", "Kitchen"])
            .await
            .unwrap();

        assert_eq!(map.len(), 1);
        assert_eq!(taxonomy.names(), vec!["Tools".to_owned()]);
    }

    #[tokio::test]
    async fn full_mode_creates_observed_categories() {
        let (mut resolver, taxonomy) = resolver_with(&[], SyncMode::Full, CategoryPolicy::Strict);
        let map = resolver
            .ensure_regular_categories(["Garden", "Kitchen", "Garden", ""])
            .await
            .unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(
            taxonomy.names(),
            vec!["Garden".to_owned(), "Kitchen".to_owned()]
        );
    }

    #[tokio::test]
    async fn specials_are_additive_to_primary() {
        let (mut resolver, _) = resolver_with(&["Tools"], SyncMode::Full, CategoryPolicy::Strict);
        let specials = resolver.ensure_special_categories().await.unwrap();
        let regular = resolver.ensure_regular_categories(Vec::<String>::new()).await.unwrap();

        let resolved = resolver.resolve("Tools", "*Hammer^");
        assert_eq!(
            resolved.terms(),
            vec![
                regular["Tools"],
                specials[&SpecialCategory::Specials],
                specials[&SpecialCategory::BackInStock],
            ]
        );
    }
}
