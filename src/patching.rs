//! Applies a critic report's declarative edits to a text body.
//!
//! Two patch classes run in order: literal inline fixes, then section
//! patches. The engine never fails on a malformed patch; anything it cannot
//! apply is skipped with a warning so that a noisy critic response degrades
//! to a smaller edit, not an error.

use tracing::{debug, warn};

use crate::report::{PatchAction, ScoreReport};
use crate::sections::Document;

/// Apply all inline fixes and section patches from `report` to `text`.
///
/// Returns the text unchanged when the report carries no patches.
pub fn apply(text: &str, report: &ScoreReport) -> String {
    if report.has_no_patches() {
        return text.to_string();
    }

    let mut text = text.to_string();
    let mut applied = 0usize;

    for fix in &report.inline_fixes {
        let find = fix.find.trim();
        if find.is_empty() {
            warn!("Skipping inline fix with empty find pattern");
            continue;
        }
        // The critic may reference wording from a prior iteration; absent
        // matches are not an error.
        if text.contains(find) {
            text = text.replace(find, fix.replace.trim());
            applied += 1;
            debug!(find = %truncate(find, 50), "Applied inline fix");
        }
    }

    for patch in &report.section_patches {
        let title = patch.title.trim();
        let content = patch.content.trim();
        if title.is_empty() || content.is_empty() {
            warn!(title = %title, "Skipping section patch with empty title or content");
            continue;
        }

        let mut doc = Document::parse(&text, Some(title));
        match patch.action {
            // Repeated insert is an idempotent overwrite.
            PatchAction::Insert | PatchAction::Replace => {
                if let Some(section) = doc.find_section_mut(title) {
                    section.replace_with(content);
                    debug!(title = %title, action = %patch.action, "Replaced section");
                } else {
                    doc.append_block(content);
                    debug!(title = %title, action = %patch.action, "Added missing section");
                }
            }
            PatchAction::Append => {
                if let Some(section) = doc.find_section_mut(title) {
                    section.append_body(content);
                    debug!(title = %title, "Extended section");
                } else {
                    doc.append_block(content);
                    debug!(title = %title, "Added missing section for append");
                }
            }
        }
        text = doc.serialize();
        applied += 1;
    }

    debug!(
        applied,
        final_len = text.len(),
        "Finished applying validator patches"
    );
    text
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
