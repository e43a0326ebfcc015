//! Fuzzy ranking of choices for interactive pickers.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use kinspect_core::Choice;

/// Rank `choices` against `query`.
///
/// Typed filters narrow first: `ns:NAME` keeps one namespace, `c:NAME` one
/// cluster. Remaining terms are fuzzy matched over the joined display strings;
/// non-matching choices are dropped and ties keep their input order. A query
/// without free terms preserves the input order.
pub fn filter_choices(choices: &[Choice], query: &str) -> Vec<Choice> {
    let mut ns_filter: Option<&str> = None;
    let mut cluster_filter: Option<&str> = None;
    let mut free_terms: Vec<&str> = Vec::new();
    for tok in query.split_whitespace() {
        if let Some(rest) = tok.strip_prefix("ns:") { ns_filter = Some(rest); continue; }
        if let Some(rest) = tok.strip_prefix("c:") { cluster_filter = Some(rest); continue; }
        free_terms.push(tok);
    }
    let narrowed = choices.iter().enumerate().filter(|(_, c)| {
        ns_filter.map_or(true, |ns| c.data.namespace.as_deref().unwrap_or("") == ns)
            && cluster_filter.map_or(true, |cl| c.data.cluster == cl)
    });
    if free_terms.is_empty() {
        return narrowed.map(|(_, c)| c.clone()).collect();
    }

    let free_q = free_terms.join(" ");
    let matcher = SkimMatcherV2::default();
    let mut scored: Vec<(i64, usize, &Choice)> = narrowed
        .filter_map(|(i, c)| matcher.fuzzy_match(&c.label(), &free_q).map(|s| (s, i, c)))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    scored.into_iter().map(|(_, _, c)| c.clone()).collect()
}
