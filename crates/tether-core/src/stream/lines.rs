//! Newline splitting across chunk boundaries.

/// Holds the unterminated tail of a text stream between chunks.
#[derive(Debug, Default, Clone)]
pub struct LineSplitter {
    partial: String,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every line it completed, without the
    /// newline (a trailing `\r` is dropped too).
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.partial.push_str(chunk);
        let Some(last_newline) = self.partial.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete[..last_newline]
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect()
    }

    /// Takes the held fragment, if non-empty (used when the stream ends).
    pub fn take_partial(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }

    pub fn partial(&self) -> &str {
        &self.partial
    }

    pub fn clear(&mut self) {
        self.partial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_fragment_until_newline() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push("hel").is_empty());
        assert_eq!(splitter.push("lo\nwor"), vec!["hello"]);
        assert_eq!(splitter.partial(), "wor");
        assert_eq!(splitter.push("ld\n"), vec!["world"]);
        assert_eq!(splitter.take_partial(), None);
    }

    #[test]
    fn splits_multiple_lines_and_keeps_empty_ones() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push("a\n\nb\r\nc"), vec!["a", "", "b"]);
        assert_eq!(splitter.take_partial().as_deref(), Some("c"));
        assert_eq!(splitter.partial(), "");
    }
}
