use serde::{Deserialize, Deserializer, Serialize};

/// Insertion-ordered set of option ids.
///
/// Persisted as a JSON array of strings. Parsing drops duplicates so the
/// stored form and the in-memory form always agree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct OptionIdSet(Vec<String>);

impl OptionIdSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns false when the id was already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.contains(&id) {
            return false;
        }
        self.0.push(id);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|existing| existing == id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Order-independent equality.
    pub fn same_members(&self, other: &OptionIdSet) -> bool {
        self.len() == other.len() && self.iter().all(|id| other.contains(id))
    }
}

impl<S: Into<String>> FromIterator<S> for OptionIdSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = OptionIdSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl<'de> Deserialize<'de> for OptionIdSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Vec::<String>::deserialize(deserializer)?;
        Ok(raw.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_first_occurrence_order() {
        let set: OptionIdSet = ["b", "a", "b", "c", "a"].into_iter().collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["b", "a", "c"]);
    }

    #[test]
    fn same_members_ignores_order() {
        let left: OptionIdSet = ["x", "y"].into_iter().collect();
        let right: OptionIdSet = ["y", "x"].into_iter().collect();
        let other: OptionIdSet = ["x"].into_iter().collect();
        assert!(left.same_members(&right));
        assert!(!left.same_members(&other));
        assert!(other.iter().all(|id| left.contains(id)));
    }

    #[test]
    fn json_form_survives_storage() {
        let empty = OptionIdSet::new();
        let stored = serde_json::to_string(&empty).unwrap();
        assert_eq!(stored, "[]");
        assert_eq!(serde_json::from_str::<OptionIdSet>(&stored).unwrap(), empty);

        let set: OptionIdSet = ["o-1", "o-2", "o-3"].into_iter().collect();
        let stored = serde_json::to_string(&set).unwrap();
        assert_eq!(stored, r#"["o-1","o-2","o-3"]"#);
        assert_eq!(serde_json::from_str::<OptionIdSet>(&stored).unwrap(), set);
    }

    #[test]
    fn parsing_collapses_duplicates() {
        let set: OptionIdSet = serde_json::from_str(r#"["a","a","b"]"#).unwrap();
        assert_eq!(set.len(), 2);
    }
}
