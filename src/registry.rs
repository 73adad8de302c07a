//! Ordered catalog of the patterns this strip can play, and resolution of
//! remote selection tokens against it.

use crate::pattern::{Pattern, PatternKind, UnknownPattern};
use std::fmt;

/// Name published when the strip is switched off.
pub const OFF_NAME: &str = "off";

/// What the strip should be doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Off,
    Pattern(usize),
}

/// Outcome of resolving a selection token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Off,
    Pattern(usize),
    /// Unrecognised token: keep whatever is selected now.
    Unchanged,
}

impl Resolution {
    /// Apply to the current selection.
    pub fn or_keep(self, current: Selection) -> Selection {
        match self {
            Self::Off => Selection::Off,
            Self::Pattern(i) => Selection::Pattern(i),
            Self::Unchanged => current,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    Empty,
    UnknownName(UnknownPattern),
    Duplicate(&'static str),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "pattern list is empty"),
            Self::UnknownName(e) => write!(f, "{e}"),
            Self::Duplicate(name) => write!(f, "pattern {name:?} listed twice"),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<UnknownPattern> for RegistryError {
    fn from(e: UnknownPattern) -> Self {
        Self::UnknownName(e)
    }
}

#[derive(Debug, Clone)]
pub struct PatternRegistry {
    patterns: Vec<Pattern>,
}

impl PatternRegistry {
    /// Build from an ordered list of pattern names; position is the numeric
    /// index the remote feed may use.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, RegistryError> {
        let mut patterns: Vec<Pattern> = Vec::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            let kind: PatternKind = name.as_ref().parse()?;
            if patterns.iter().any(|p| p.kind() == kind) {
                return Err(RegistryError::Duplicate(kind.name()));
            }
            patterns.push(Pattern::new(kind, index));
        }

        if patterns.is_empty() {
            return Err(RegistryError::Empty);
        }
        Ok(Self { patterns })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Pattern> {
        self.patterns.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.iter()
    }

    /// Resolve a selection token: `off`, then a pattern name, then a decimal
    /// index. Case and surrounding whitespace are ignored.
    pub fn resolve(&self, token: &str) -> Resolution {
        let token = token.trim().to_ascii_lowercase();

        if token == OFF_NAME {
            return Resolution::Off;
        }

        if let Some(p) = self.patterns.iter().find(|p| p.name() == token) {
            return Resolution::Pattern(p.index());
        }

        match token.parse::<usize>() {
            Ok(i) if i < self.patterns.len() => Resolution::Pattern(i),
            _ => Resolution::Unchanged,
        }
    }

    /// Name to publish for a selection.
    pub fn display_name(&self, selection: Selection) -> &'static str {
        match selection {
            Selection::Off => OFF_NAME,
            Selection::Pattern(i) => self.patterns.get(i).map_or(OFF_NAME, Pattern::name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    const DEFAULT_NAMES: [&str; 7] = ["fall", "july", "xmas", "normal", "alert", "blue", "pink"];

    #[fixture]
    fn registry() -> PatternRegistry {
        PatternRegistry::from_names(&DEFAULT_NAMES).unwrap()
    }

    #[rstest]
    #[case("off")]
    #[case("OFF")]
    #[case("  Off\n")]
    #[case("\toFf ")]
    fn off_in_any_case_resolves_to_off(registry: PatternRegistry, #[case] token: &str) {
        assert_eq!(registry.resolve(token), Resolution::Off);
    }

    #[rstest]
    #[case("fall", 0)]
    #[case("xmas", 2)]
    #[case(" Pink ", 6)]
    #[case("3", 3)]
    #[case("0", 0)]
    #[case(" 6 ", 6)]
    fn names_and_numerals_resolve(
        registry: PatternRegistry,
        #[case] token: &str,
        #[case] expected: usize,
    ) {
        assert_eq!(registry.resolve(token), Resolution::Pattern(expected));
    }

    #[rstest]
    #[case("99")]
    #[case("7")]
    #[case("-1")]
    #[case("")]
    #[case("disco")]
    #[case("2.0")]
    fn unrecognised_tokens_leave_selection_unchanged(
        registry: PatternRegistry,
        #[case] token: &str,
    ) {
        assert_eq!(registry.resolve(token), Resolution::Unchanged);
    }

    #[test]
    fn order_follows_configuration() {
        let registry = PatternRegistry::from_names(&["pink", "fall"]).unwrap();
        assert_eq!(registry.resolve("0"), Resolution::Pattern(0));
        assert_eq!(registry.get(0).unwrap().name(), "pink");
        assert_eq!(registry.resolve("fall"), Resolution::Pattern(1));
        assert_eq!(registry.resolve("xmas"), Resolution::Unchanged);
    }

    #[test]
    fn unchanged_keeps_current_selection() {
        let current = Selection::Pattern(3);
        assert_eq!(Resolution::Unchanged.or_keep(current), current);
        assert_eq!(Resolution::Off.or_keep(current), Selection::Off);
        assert_eq!(Resolution::Pattern(1).or_keep(current), Selection::Pattern(1));
    }

    #[rstest]
    fn display_names(registry: PatternRegistry) {
        assert_eq!(registry.display_name(Selection::Off), "off");
        assert_eq!(registry.display_name(Selection::Pattern(2)), "xmas");
    }

    #[test]
    fn empty_list_is_rejected() {
        let names: [&str; 0] = [];
        assert_eq!(
            PatternRegistry::from_names(&names).unwrap_err(),
            RegistryError::Empty
        );
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = PatternRegistry::from_names(&["fall", "disco"]).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownName(_)));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let err = PatternRegistry::from_names(&["fall", "Fall"]).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("fall"));
    }
}
