use url::form_urlencoded;

/// Ordered key/value view of a page query string.
///
/// Setting an existing key replaces its value in place so unrelated keys keep
/// their position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryState {
    pairs: Vec<(String, String)>,
}

impl QueryState {
    /// Parse `?a=1&b=2` (leading `?` optional). Blank input yields no pairs.
    pub fn parse(query: &str) -> Self {
        let raw = query.strip_prefix('?').unwrap_or(query).trim();
        let pairs = form_urlencoded::parse(raw.as_bytes())
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        Self { pairs }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: &str) {
        match self.pairs.iter_mut().find(|(k, _)| k == key) {
            Some(pair) => pair.1 = value.to_string(),
            None => self.pairs.push((key.to_string(), value.to_string())),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.pairs.retain(|(k, _)| k != key);
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Serialize back to `?a=1&b=2`, or the empty string when no pairs remain.
    pub fn to_query_string(&self) -> String {
        if self.pairs.is_empty() {
            return String::new();
        }
        // Pairs start after the '?', so no separator is emitted before the first one.
        let mut serializer = form_urlencoded::Serializer::for_suffix(String::from("?"), 1);
        serializer.extend_pairs(self.pairs.iter());
        serializer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::QueryState;

    #[test]
    fn parses_with_and_without_question_mark() {
        assert_eq!(QueryState::parse("?a=1&b=2").get("b"), Some("2"));
        assert_eq!(QueryState::parse("a=1").get("a"), Some("1"));
        assert!(QueryState::parse("").is_empty());
        assert!(QueryState::parse("?  ").is_empty());
    }

    #[test]
    fn set_replaces_in_place_and_remove_drops_key() {
        let mut state = QueryState::parse("?tab=ingest&ingest-job-id=1");
        state.set("ingest-job-id", "2");
        state.set("sync-job-id", "9");
        assert_eq!(
            state.to_query_string(),
            "?tab=ingest&ingest-job-id=2&sync-job-id=9"
        );

        state.remove("tab");
        state.remove("ingest-job-id");
        state.remove("sync-job-id");
        assert_eq!(state.to_query_string(), "");
    }
}
