//! Button resolution: the current action set and label matching against it.

use crate::channels::{Button, InboundEvent};
use crate::relay::error::RelayError;

/// Buttons of the highest-id event that has any. Earlier button-bearing messages are not merged in.
pub fn latest_buttons(events: &[InboundEvent]) -> Vec<Vec<Button>> {
    events
        .iter()
        .filter(|e| e.has_buttons())
        .max_by_key(|e| e.id)
        .map(|e| e.buttons.clone())
        .unwrap_or_default()
}

/// Find the button for a free-text label.
///
/// An exact match (both sides trimmed) anywhere in the rows beats any substring
/// match; failing that, the first button whose label contains the target, or is
/// contained in it, wins. Rows are scanned in order, then buttons within a row.
pub fn resolve_button<'a>(
    rows: &'a [Vec<Button>],
    message_id: i64,
    target: &str,
) -> Result<&'a Button, RelayError> {
    if rows.iter().all(|row| row.is_empty()) {
        return Err(RelayError::NoButtonsAvailable(message_id));
    }
    let wanted = target.trim();
    let mut loose: Option<&Button> = None;
    for button in rows.iter().flatten() {
        let label = button.label.trim();
        if label == wanted {
            return Ok(button);
        }
        if loose.is_none()
            && !label.is_empty()
            && !wanted.is_empty()
            && (label.contains(wanted) || wanted.contains(label))
        {
            loose = Some(button);
        }
    }
    loose.ok_or_else(|| RelayError::ButtonNotFound(wanted.to_string()))
}
