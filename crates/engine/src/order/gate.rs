//! The "are all prerequisites done" predicate.
//!
//! Both the execution order resolver and the board use this one function; each supplies
//! its own notion of "done" through the lookup closure.

/// Returns true when every dependency satisfies `is_done`.
///
/// An empty dependency list is always satisfied.
pub fn prerequisites_satisfied<'a, I, F>(dependencies: I, is_done: F) -> bool
where
    I: IntoIterator<Item = &'a str>,
    F: FnMut(&str) -> bool,
{
    first_unsatisfied(dependencies, is_done).is_none()
}

/// Returns the first dependency that does not satisfy `is_done`, if any.
pub fn first_unsatisfied<'a, I, F>(dependencies: I, mut is_done: F) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
    F: FnMut(&str) -> bool,
{
    dependencies.into_iter().find(|dependency| !is_done(*dependency))
}

/// Collects every dependency that does not satisfy `is_done`, in declaration order.
pub fn unsatisfied<'a, I, F>(dependencies: I, mut is_done: F) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
    F: FnMut(&str) -> bool,
{
    dependencies.into_iter().filter(|dependency| !is_done(*dependency)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn empty_dependency_list_is_satisfied() {
        assert!(prerequisites_satisfied(std::iter::empty(), |_| false));
    }

    #[test]
    fn reports_missing_prerequisites_in_order() {
        let done: HashSet<&str> = ["a"].into_iter().collect();
        let dependencies = ["a", "b", "c"];

        assert!(!prerequisites_satisfied(dependencies, |id| done.contains(id)));
        assert_eq!(first_unsatisfied(dependencies, |id| done.contains(id)), Some("b"));
        assert_eq!(unsatisfied(dependencies, |id| done.contains(id)), vec!["b", "c"]);
    }
}
