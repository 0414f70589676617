use crate::model::{ActionKind, PlaybackAction, Reason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub action_index: usize,
    pub line: String,
}

/// Precompute console trace events so each line can be printed right before
/// the action it describes runs.
///
/// A recall followed later by its correction is reported once, at the recall,
/// as a `Replace` line.
pub fn timeline_console_trace(actions: &[PlaybackAction]) -> Vec<TraceEvent> {
    let mut events = Vec::new();

    for (action_index, action) in actions.iter().enumerate() {
        let line = match action.kind {
            ActionKind::TypingStart => {
                if action.metadata.reason == Some(Reason::Hesitation) {
                    Some("Typing (hesitation)...".to_string())
                } else {
                    let upcoming = actions[action_index..]
                        .iter()
                        .find(|a| a.kind == ActionKind::Send)
                        .and_then(|a| a.text.as_deref())
                        .unwrap_or_default();
                    Some(format!("Typing \"{}\"...", escape_for_log(upcoming)))
                }
            }
            ActionKind::Send if action.metadata.is_correction => None,
            ActionKind::Send => Some(format!(
                "Send \"{}\"",
                escape_for_log(action.text.as_deref().unwrap_or_default())
            )),
            ActionKind::Image => Some(format!(
                "Sticker {}",
                action.text.as_deref().unwrap_or_default()
            )),
            ActionKind::Recall => Some(recall_line(actions, action)),
            ActionKind::TypingEnd | ActionKind::Wait | ActionKind::Pause => None,
        };

        if let Some(line) = line {
            events.push(TraceEvent { action_index, line });
        }
    }

    events
}

fn recall_line(actions: &[PlaybackAction], recall: &PlaybackAction) -> String {
    let target = recall.target_id.as_deref().unwrap_or_default();
    let wrong = actions
        .iter()
        .find(|a| a.message_id.as_deref() == Some(target))
        .and_then(|a| a.text.as_deref());
    let right = actions
        .iter()
        .find(|a| a.metadata.is_correction && a.metadata.correction_for.as_deref() == Some(target))
        .and_then(|a| a.text.as_deref());

    match (wrong, right) {
        (Some(wrong), Some(right)) => format!(
            "Replace \"{}\" with \"{}\"...",
            escape_for_log(wrong),
            escape_for_log(right)
        ),
        (Some(wrong), None) => format!("Recall \"{}\"", escape_for_log(wrong)),
        _ => format!("Recall {target}"),
    }
}

pub(crate) fn escape_for_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}
