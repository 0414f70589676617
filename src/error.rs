use crate::model::ActionKind;

/// Why an LLM response could not be turned into a reply.
#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("reply is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("reply has no text content")]
    EmptyContent,
}

/// Failure of a single scheduled action. The run logs it and moves on.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("{kind} action has no target message id")]
    MissingTarget { kind: &'static str },
    #[error("{kind} action has no payload text")]
    MissingPayload { kind: &'static str },
    #[error("{kind} action failed in backend")]
    Backend {
        kind: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl PlaybackError {
    pub fn backend(kind: ActionKind, source: anyhow::Error) -> Self {
        PlaybackError::Backend {
            kind: kind.as_str(),
            source,
        }
    }
}
