//! Context assembly: merge, order, and truncate retrieved fragments.
//!
//! Fragments are ordered by `(document_id, sequence_index)` rather than
//! score so that neighboring fragments of one document read as coherent
//! prose — score-sorted fragments interleave documents mid-sentence and
//! degrade generation quality.
//!
//! Inclusion is greedy under a character budget. A fragment that would
//! overflow is skipped when smaller candidates remain. When *nothing*
//! fits — the window would otherwise be empty — the first fragment in
//! order is truncated to the budget at a sentence boundary, falling
//! back to a word boundary, falling back to a hard character cut.

use std::collections::HashSet;

use crate::error::{CoreError, Result};
use crate::models::{ContextWindow, Fragment};

/// Characters that end a sentence for truncation purposes.
const SENTENCE_ENDS: [char; 4] = ['.', '!', '?', '\n'];

/// Assemble a budget-bounded context window from retrieved fragments.
///
/// `budget` is a character budget; the returned window's `total_size`
/// never exceeds it. Duplicate fragment ids are merged (first
/// occurrence wins). Fails with [`CoreError::NoFragments`] on empty
/// input and [`CoreError::InvalidArgument`] on a zero budget.
pub fn assemble(fragments: &[Fragment], budget: usize) -> Result<ContextWindow> {
    if fragments.is_empty() {
        return Err(CoreError::NoFragments);
    }
    if budget == 0 {
        return Err(CoreError::InvalidArgument("budget must be > 0".into()));
    }

    let mut seen = HashSet::new();
    let mut ordered: Vec<&Fragment> = fragments
        .iter()
        .filter(|f| seen.insert(f.id.as_str()))
        .collect();
    ordered.sort_by(|a, b| {
        a.document_id
            .cmp(&b.document_id)
            .then_with(|| a.sequence_index.cmp(&b.sequence_index))
    });

    let mut included: Vec<Fragment> = Vec::new();
    let mut total_size = 0usize;
    for fragment in &ordered {
        let len = fragment.text.chars().count();
        if total_size + len <= budget {
            included.push((*fragment).clone());
            total_size += len;
        }
    }

    // Nothing fit whole: truncate the first fragment in order so the
    // generator still receives some context.
    if included.is_empty() {
        let first = ordered[0];
        let truncated = truncate_at_boundary(&first.text, budget);
        total_size = truncated.chars().count();
        let mut fragment = first.clone();
        fragment.text = truncated;
        included.push(fragment);
    }

    Ok(ContextWindow {
        fragments: included,
        total_size,
    })
}

/// Cut `text` to at most `budget` characters at a safe boundary.
///
/// Prefers the last sentence end within the budget, then the last
/// whitespace, then a hard character cut.
fn truncate_at_boundary(text: &str, budget: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= budget {
        return text.to_string();
    }
    let window = &chars[..budget];

    let sentence_cut = window
        .iter()
        .rposition(|c| SENTENCE_ENDS.contains(c))
        .map(|i| i + 1);
    let word_cut = window.iter().rposition(|c| c.is_whitespace());

    let cut = sentence_cut.or(word_cut).unwrap_or(budget);
    let cut = if cut == 0 { budget } else { cut };
    window[..cut].iter().collect()
}
