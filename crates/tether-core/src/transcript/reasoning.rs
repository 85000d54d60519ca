//! Aggregation of interleaved reasoning fragments.

/// Separator placed between fragments in the aggregate text.
const FRAGMENT_SEPARATOR: &str = "\n\n";

/// Outcome of [`ReasoningAccumulator::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningUpdate {
    pub group_id: String,
    pub text: String,
    pub changed: bool,
}

/// Reasoning fragments for one logical turn, kept in first-seen order.
///
/// Re-adding a fragment updates its text in place; it never moves.
#[derive(Debug, Clone)]
pub struct ReasoningAccumulator {
    group_id: String,
    fragments: Vec<(String, String)>,
    text: String,
    anonymous: usize,
}

impl ReasoningAccumulator {
    pub fn new(initial_group_id: impl Into<String>) -> Self {
        Self {
            group_id: initial_group_id.into(),
            fragments: Vec::new(),
            text: String::new(),
            anonymous: 0,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Clears every fragment and starts `group_id`.
    pub fn reset(&mut self, group_id: impl Into<String>) {
        self.group_id = group_id.into();
        self.fragments.clear();
        self.text.clear();
        self.anonymous = 0;
    }

    /// Fresh fragment id for producers that don't name their fragments.
    pub fn next_anonymous_id(&mut self) -> String {
        self.anonymous += 1;
        format!("#{}", self.anonymous)
    }

    /// Inserts or updates one fragment.
    ///
    /// Identical text (after trimming) is a no-op and reports `changed = false`.
    pub fn add(&mut self, fragment_id: &str, text: &str) -> ReasoningUpdate {
        let text = text.trim();
        let changed = match self.fragments.iter_mut().find(|(id, _)| id == fragment_id) {
            Some((_, existing)) if existing == text => false,
            Some((_, existing)) => {
                text.clone_into(existing);
                true
            }
            None => {
                self.fragments
                    .push((fragment_id.to_string(), text.to_string()));
                true
            }
        };

        if changed {
            self.rebuild();
        }

        ReasoningUpdate {
            group_id: self.group_id.clone(),
            text: self.text.clone(),
            changed,
        }
    }

    fn rebuild(&mut self) {
        self.text.clear();
        for (_, fragment) in self.fragments.iter().filter(|(_, t)| !t.is_empty()) {
            if !self.text.is_empty() {
                self.text.push_str(FRAGMENT_SEPARATOR);
            }
            self.text.push_str(fragment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_fragments_in_first_seen_order() {
        let mut acc = ReasoningAccumulator::new("turn-1");
        acc.add("b", "second");
        let update = acc.add("a", "first");
        assert_eq!(update.group_id, "turn-1");
        assert_eq!(update.text, "second\n\nfirst");
        assert!(update.changed);
    }

    #[test]
    fn identical_readd_is_noop() {
        let mut acc = ReasoningAccumulator::new("g");
        acc.add("a", "plan the change");
        acc.add("b", "write tests");
        let update = acc.add("a", "  plan the change\n");
        assert!(!update.changed);
        assert_eq!(update.text, "plan the change\n\nwrite tests");
    }

    #[test]
    fn changed_text_updates_in_place() {
        let mut acc = ReasoningAccumulator::new("g");
        acc.add("a", "Look");
        acc.add("b", "Then edit");
        let update = acc.add("a", "Look at the parser");
        assert!(update.changed);
        assert_eq!(update.text, "Look at the parser\n\nThen edit");
    }

    #[test]
    fn reset_starts_new_group() {
        let mut acc = ReasoningAccumulator::new("initial");
        acc.add("a", "old");
        acc.reset("turn-2");
        assert!(acc.is_empty());
        let update = acc.add("a", "new");
        assert_eq!(update.group_id, "turn-2");
        assert_eq!(update.text, "new");
    }

    #[test]
    fn empty_fragments_are_skipped_in_aggregate() {
        let mut acc = ReasoningAccumulator::new("g");
        acc.add("a", "   ");
        let update = acc.add("b", "body");
        assert_eq!(update.text, "body");
        assert_eq!(acc.len(), 2);
    }
}
