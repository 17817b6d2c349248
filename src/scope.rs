use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:[\p{ID_Start}$_]|\\u[0-9a-fA-F]{4}|\\u\{[0-9a-fA-F]+\})(?:[\p{ID_Continue}$\x{200C}\x{200D}]|\\u[0-9a-fA-F]{4}|\\u\{[0-9a-fA-F]+\})*",
    )
    .expect("identifier pattern is valid")
});

static UNICODE_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\u(?:([0-9a-fA-F]{4})|\{([0-9a-fA-F]+)\})").expect("escape pattern is valid")
});

/// Every identifier-shaped token in a fragment of template code, with
/// `\u` escapes decoded. Deliberately over-inclusive: property names and
/// words inside string literals count too.
pub(crate) fn identifiers_in(code: &str) -> impl Iterator<Item = String> + '_ {
    IDENTIFIER.find_iter(code).map(|m| {
        UNICODE_ESCAPE
            .replace_all(m.as_str(), |captures: &regex::Captures<'_>| {
                let digits = captures.get(1).or_else(|| captures.get(2));
                digits
                    .and_then(|d| u32::from_str_radix(d.as_str(), 16).ok())
                    .and_then(char::from_u32)
                    .map_or_else(|| captures[0].to_owned(), String::from)
            })
            .into_owned()
    })
}

/// Names in use by the generated program.
///
/// Compiler temporaries are drawn from here so they can never capture or
/// shadow a name the template author wrote.
#[derive(Debug, Default)]
pub(crate) struct Scope {
    used: HashSet<String>,
    possible_conflicts: BTreeSet<String>,
}

impl Scope {
    pub(crate) fn new(possible_conflicts: BTreeSet<String>) -> Self {
        Self {
            used: HashSet::new(),
            possible_conflicts,
        }
    }

    pub(crate) fn is_used(&self, name: &str) -> bool {
        self.used.contains(name) || self.possible_conflicts.contains(name)
    }

    /// Marks `name` as bound, returning whether it was free before.
    pub(crate) fn reserve(&mut self, name: &str) -> bool {
        self.used.insert(name.to_owned())
    }

    pub(crate) fn release(&mut self, name: &str) {
        self.used.remove(name);
    }

    /// Reserves and returns a fresh name: `prefix` itself if it is free,
    /// otherwise `prefix_1`, `prefix_2` and so on.
    pub(crate) fn get_name(&mut self, prefix: &str) -> String {
        let mut name = prefix.to_owned();
        let mut suffix = 0;

        while self.is_used(&name) {
            suffix += 1;
            name = format!("{prefix}_{suffix}");
        }

        self.used.insert(name.clone());
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn identifiers_include_properties_and_string_contents() {
        let found: Vec<String> = identifiers_in("data.user['name'] + count2 * 3").collect();
        assert_eq!(found, ["data", "user", "name", "count2"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn escaped_identifiers_are_decoded() {
        let found: Vec<String> = identifiers_in(r"\u0061bc + x\u{62}").collect();
        assert_eq!(found, ["abc", "xb"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn fresh_names_skip_conflicts() {
        let mut scope = Scope::new(["output".to_owned(), "output_1".to_owned()].into());

        assert_eq!(scope.get_name("output"), "output_2");
        assert_eq!(scope.get_name("output"), "output_3");
        assert_eq!(scope.get_name("condition"), "condition");
        assert_eq!(scope.get_name("condition"), "condition_1");
    }

    #[test]
    #[ntest::timeout(100)]
    fn released_names_are_reused() {
        let mut scope = Scope::default();

        let name = scope.get_name("index");
        assert!(scope.is_used(&name));
        scope.release(&name);
        assert!(!scope.is_used(&name));
        assert_eq!(scope.get_name("index"), "index");
    }

    #[test]
    #[ntest::timeout(100)]
    fn reserve_reports_prior_use() {
        let mut scope = Scope::default();
        assert!(scope.reserve("item"));
        assert!(!scope.reserve("item"));
    }
}
