//! Unique display names for labels and locals.

use std::collections::{HashMap, HashSet};

/// Hands out names unique within one namespace: `root0`, `root1`, ...
/// skipping any name already claimed explicitly.
#[derive(Debug, Clone, Default)]
pub struct Namer {
    counters: HashMap<String, usize>,
    taken: HashSet<String>,
}

impl Namer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh name from `root`.
    pub fn fresh(&mut self, root: &str) -> String {
        let counter = self.counters.entry(root.to_string()).or_insert(0);
        loop {
            let name = format!("{root}{counter}");
            *counter += 1;
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }

    /// Claim `name` as given. Returns false if it is already in use.
    pub fn claim(&mut self, name: &str) -> bool {
        self.taken.insert(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_per_root() {
        let mut namer = Namer::new();
        assert_eq!(namer.fresh("label"), "label0");
        assert_eq!(namer.fresh("label"), "label1");
        assert_eq!(namer.fresh("local"), "local0");
    }

    #[test]
    fn skips_claimed_names() {
        let mut namer = Namer::new();
        assert!(namer.claim("label0"));
        assert_eq!(namer.fresh("label"), "label1");
        assert!(!namer.claim("label1"));
    }
}
