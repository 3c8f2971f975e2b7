//! Pick exactly one object out of a search.

use crate::error::ProviderError;

/// How one candidate compares to the search criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    /// Every given criterion matched.
    Full,
    /// Not a match.
    None,
    /// Some criteria matched and another did not; the reason is shown when
    /// nothing matches fully.
    Partial(String),
}

/// Wording used in search diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct SearchSubject {
    /// e.g. "app install"
    pub singular: &'static str,
    /// e.g. "app installs"
    pub plural: &'static str,
    /// Attributes that narrow the search, e.g. "'id', 'app_id' or 'app_name'".
    pub criteria: &'static str,
    /// Sentence appended when nothing matched.
    pub hint: &'static str,
}

/// Return the only candidate that fully matches.
///
/// Zero matches give "No search results" (or "No search results due to
/// mismatch" carrying the first partial mismatch reason), several give
/// "Ambiguous search results" listing their ids.
pub fn find_unique<T, I, M, K>(candidates: I, subject: &SearchSubject, matcher: M, id_of: K) -> Result<T, ProviderError>
where
    I: IntoIterator<Item = T>,
    M: Fn(&T) -> Match,
    K: Fn(&T) -> &str,
{
    let mut found = Vec::new();
    let mut partial_reason: Option<String> = None;
    for candidate in candidates {
        match matcher(&candidate) {
            Match::Full => found.push(candidate),
            Match::Partial(reason) => {
                partial_reason.get_or_insert(reason);
            },
            Match::None => {},
        }
    }

    if found.len() > 1 {
        let ids: Vec<&str> = found.iter().map(|c| id_of(c)).collect();
        return Err(ProviderError::failed(
            "Ambiguous search results",
            format!(
                "The provided criteria match multiple {}.\nPlease provide a more specific combination of search attributes such as {}, to uniquely identify one.\nFound {} ids: [{}]",
                subject.plural,
                subject.criteria,
                subject.singular,
                ids.join(" ")
            ),
        ));
    }

    match found.pop() {
        Some(only) => Ok(only),
        None => match partial_reason {
            Some(reason) => Err(ProviderError::failed("No search results due to mismatch", reason)),
            None => Err(ProviderError::failed(
                "No search results",
                format!(
                    "No {} matched the provided criteria. {}",
                    subject.singular, subject.hint
                ),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEM: SearchSubject = SearchSubject {
        singular: "item",
        plural: "items",
        criteria: "'id' or 'name'",
        hint: "Please verify the search attributes.",
    };

    fn by_name(name: &'static str) -> impl Fn(&(&'static str, &'static str)) -> Match {
        move |item: &(&'static str, &'static str)| if item.1 == name { Match::Full } else { Match::None }
    }

    fn summary_and_detail(err: ProviderError) -> (String, String) {
        let d = err.into_diagnostics().remove(0);
        (d.summary, d.detail.unwrap_or_default())
    }

    #[test]
    fn test_single_match() {
        let items = vec![("1", "a"), ("2", "b")];
        let found = find_unique(items, &ITEM, by_name("b"), |i| i.0).unwrap();
        assert_eq!(found, ("2", "b"));
    }

    #[test]
    fn test_no_match() {
        let items = vec![("1", "a")];
        let (summary, detail) = summary_and_detail(find_unique(items, &ITEM, by_name("z"), |i| i.0).unwrap_err());
        assert_eq!(summary, "No search results");
        assert_eq!(
            detail,
            "No item matched the provided criteria. Please verify the search attributes."
        );
    }

    #[test]
    fn test_ambiguous() {
        let items = vec![("1", "a"), ("2", "a"), ("3", "b")];
        let (summary, detail) = summary_and_detail(find_unique(items, &ITEM, by_name("a"), |i| i.0).unwrap_err());
        assert_eq!(summary, "Ambiguous search results");
        assert!(detail.starts_with("The provided criteria match multiple items.\n"));
        assert!(detail.ends_with("Found item ids: [1 2]"));
    }

    #[test]
    fn test_first_partial_reason_wins() {
        let items = vec![("1", "a"), ("2", "b")];
        let matcher = |(id, _): &(&str, &str)| Match::Partial(format!("reason {}", id));
        let (summary, detail) = summary_and_detail(find_unique(items, &ITEM, matcher, |i| i.0).unwrap_err());
        assert_eq!(summary, "No search results due to mismatch");
        assert_eq!(detail, "reason 1");
    }
}
