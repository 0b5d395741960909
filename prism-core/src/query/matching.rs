//! Pure visibility tests.

use indexmap::IndexSet;

use super::ALL_SCOPES;
use crate::record::Record;

/// Item-level test: does `record` match the free-text query `text`?
///
/// The query is split on whitespace. The record matches if any token is a
/// case-insensitive substring of any text found under any of the `labels`
/// attributes (lists are searched element-wise). A blank query matches
/// every record.
pub fn text_matches<S: AsRef<str>>(record: &Record, labels: &[S], text: &str) -> bool {
    let tokens: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
    if tokens.is_empty() {
        return true;
    }

    record.with_attributes(|attributes| {
        labels
            .iter()
            .filter_map(|label| attributes.get(label.as_ref()))
            .flat_map(|value| value.texts())
            .any(|label| {
                let label = label.to_lowercase();
                tokens.iter().any(|token| label.contains(token.as_str()))
            })
    })
}

/// Group-level test: is a group of type `group_type` in scope?
pub fn scope_matches(scopes: &IndexSet<String>, group_type: &str) -> bool {
    scopes.contains(ALL_SCOPES) || scopes.contains(group_type)
}

/// A predicate closure for [`text_matches`], fixed to one query text.
pub fn text_predicate(text: &str, labels: &[String]) -> impl Fn(&Record) -> bool + 'static {
    let text = text.to_string();
    let labels = labels.to_vec();
    move |record: &Record| text_matches(record, &labels, &text)
}
