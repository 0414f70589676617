use futures_util::future::join_all;
use tracing::{debug, warn};

use super::{PlaybackHandle, RunReport};

/// Owns the in-flight runs of one session so they can be cancelled and
/// awaited together.
#[derive(Debug, Default)]
pub struct RunRegistry {
    handles: Vec<PlaybackHandle>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, handle: PlaybackHandle) {
        self.prune_finished();
        debug!(conversation_id = handle.conversation_id(), "tracking timeline run");
        self.handles.push(handle);
    }

    /// Drop handles whose task already ended.
    pub fn prune_finished(&mut self) -> usize {
        let before = self.handles.len();
        self.handles.retain(|h| !h.is_finished());
        before - self.handles.len()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every tracked run and wait for all of them to stop.
    pub async fn cancel_all(&mut self) -> Vec<RunReport> {
        let handles = std::mem::take(&mut self.handles);
        for handle in &handles {
            handle.cancel();
        }

        join_all(handles.into_iter().map(PlaybackHandle::wait))
            .await
            .into_iter()
            .filter_map(|result| match result {
                Ok(report) => Some(report),
                Err(err) => {
                    warn!("timeline run did not stop cleanly: {err:#}");
                    None
                }
            })
            .collect()
    }
}
