use std::collections::HashSet;

use anyhow::{anyhow, ensure, Result};

use crate::model::{ActionKind, PlaybackAction, Timeline};

#[derive(Debug, Clone, Copy, Default)]
pub struct TimelineStats {
    pub actions: usize,
    pub sends: usize,
    pub recalls: usize,
    pub images: usize,
    pub typing_brackets: usize,
    pub total_wait_secs: f64,
    /// Timestamp of the last action.
    pub span_secs: f64,
}

pub fn stats(timeline: &Timeline) -> TimelineStats {
    let mut out = TimelineStats {
        actions: timeline.actions.len(),
        ..Default::default()
    };

    for a in &timeline.actions {
        match a.kind {
            ActionKind::Send => out.sends += 1,
            ActionKind::Recall => out.recalls += 1,
            ActionKind::Image => out.images += 1,
            ActionKind::TypingStart => out.typing_brackets += 1,
            ActionKind::Wait | ActionKind::Pause => out.total_wait_secs += a.duration,
            ActionKind::TypingEnd => {}
        }
        out.span_secs = out.span_secs.max(a.timestamp);
    }

    out
}

/// Messages a viewer would still see after the schedule ran to completion,
/// in delivery order. Mirrors the scheduler's correction rule: a correction
/// whose typo was never recalled is not delivered.
pub fn visible_history(actions: &[PlaybackAction]) -> Vec<String> {
    let mut delivered: Vec<(Option<&str>, &str)> = Vec::new();
    let mut recalled: HashSet<&str> = HashSet::new();

    for action in actions {
        match action.kind {
            ActionKind::Send | ActionKind::Image => {
                if action.metadata.is_correction {
                    let target = action.metadata.correction_for.as_deref();
                    if !target.is_some_and(|t| recalled.contains(t)) {
                        continue;
                    }
                }
                delivered.push((
                    action.message_id.as_deref(),
                    action.text.as_deref().unwrap_or_default(),
                ));
            }
            ActionKind::Recall => {
                if let Some(target) = action.target_id.as_deref() {
                    if delivered.iter().any(|(id, _)| *id == Some(target)) {
                        recalled.insert(target);
                    }
                }
            }
            _ => {}
        }
    }

    delivered
        .into_iter()
        .filter(|(id, _)| !id.is_some_and(|id| recalled.contains(id)))
        .map(|(_, text)| text.to_string())
        .collect()
}

/// Structural checks every built schedule satisfies.
pub fn check_invariants(actions: &[PlaybackAction]) -> Result<()> {
    let mut last_ts = 0.0_f64;
    let mut typing = false;
    let mut ids: HashSet<&str> = HashSet::new();

    for (i, a) in actions.iter().enumerate() {
        ensure!(
            a.timestamp.is_finite() && a.timestamp >= 0.0,
            "action {i} has invalid timestamp {}",
            a.timestamp
        );
        ensure!(
            a.timestamp + 1e-9 >= last_ts,
            "action {i} goes back in time ({} < {last_ts})",
            a.timestamp
        );
        last_ts = a.timestamp;
        ensure!(a.duration >= 0.0, "action {i} has negative duration");

        match a.kind {
            ActionKind::Send | ActionKind::Image => {
                let id = a
                    .message_id
                    .as_deref()
                    .ok_or_else(|| anyhow!("{} at {i} has no message_id", a.kind.as_str()))?;
                ensure!(ids.insert(id), "duplicate message_id {id} at {i}");
            }
            ActionKind::Recall => {
                let target = a
                    .target_id
                    .as_deref()
                    .ok_or_else(|| anyhow!("recall at {i} has no target_id"))?;
                ensure!(
                    ids.contains(target),
                    "recall at {i} targets {target} before it was sent"
                );
            }
            ActionKind::TypingStart => {
                ensure!(!typing, "nested typing_start at {i}");
                typing = true;
            }
            ActionKind::TypingEnd => {
                ensure!(typing, "typing_end without typing_start at {i}");
                typing = false;
            }
            ActionKind::Wait | ActionKind::Pause => {}
        }
    }

    ensure!(!typing, "typing left open at end of timeline");
    Ok(())
}
