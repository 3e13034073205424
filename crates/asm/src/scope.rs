use std::fmt;

/// A scope path: zero or more names joined by `/`.
///
/// Scopes namespace labels, constants and macros. Symbol table keys are the
/// lowercased form of a scoped name, so lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope(String);

impl Scope {
    pub fn root() -> Scope {
        Scope::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a copy of the scope with the given name appended.
    pub fn join(&self, name: &str) -> Scope {
        if self.0.is_empty() {
            return Scope(name.to_string());
        }
        if name.is_empty() {
            return self.clone();
        }
        Scope(format!("{}/{}", self.0, name))
    }

    /// Splits off the innermost component. Returns the enclosing scope and
    /// the component; at the root the component is the full (possibly empty)
    /// scope string.
    pub fn split(&self) -> (Scope, String) {
        match self.0.rsplit_once('/') {
            Some((parent, last)) => (Scope(parent.to_string()), last.to_string()),
            None => (Scope::root(), self.0.clone()),
        }
    }

    /// Returns the enclosing scope.
    pub fn parent(&self) -> Scope {
        self.split().0
    }

    /// Returns the case-insensitive symbol table key for a name resolved in
    /// this scope.
    pub fn key(&self, name: &str) -> String {
        self.join(name).0.to_lowercase()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_and_splits() {
        let scope = Scope::root().join("a").join("b").join("c");
        assert_eq!(scope.as_str(), "a/b/c");

        let (parent, last) = scope.split();
        assert_eq!(parent.as_str(), "a/b");
        assert_eq!(last, "c");

        let (root, only) = Scope::root().join("x").split();
        assert!(root.is_root());
        assert_eq!(only, "x");
    }

    #[test]
    fn keys_are_lowercase() {
        let scope = Scope::root().join("Main");
        assert_eq!(scope.key("Loop"), "main/loop");
    }

    #[test]
    fn join_on_root_has_no_separator() {
        assert_eq!(Scope::root().join("main").as_str(), "main");
        assert_eq!(Scope::root().key("Main"), "main");
    }
}
