//! Outcome of one processing-core invocation

/// Reply the processing core sends when a proactive check found nothing to do.
///
/// This literal is part of the contract with the core: a completed turn
/// whose text is exactly this value (surrounding whitespace ignored) is
/// treated as silent and never delivered.
pub const SILENT_SENTINEL: &str = "HEARTBEAT_OK";

/// Tagged result of a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnResult {
    /// Nothing to deliver
    Silent,
    /// The turn failed; logged, never shown to the user
    Error(String),
    /// Work continues in the background; carries a status message only
    Async(String),
    /// Finished with a payload
    Completed {
        /// Model-facing rendering
        for_llm: String,
        /// User-facing rendering, preferred for delivery when present
        for_user: Option<String>,
    },
}

impl TurnResult {
    /// Completed turn whose single rendering is shown to the user
    pub fn completed(text: impl Into<String>) -> Self {
        Self::Completed {
            for_llm: text.into(),
            for_user: None,
        }
    }

    /// Completed turn with separate model- and user-facing renderings
    pub fn completed_for_user(for_llm: impl Into<String>, for_user: impl Into<String>) -> Self {
        Self::Completed {
            for_llm: for_llm.into(),
            for_user: Some(for_user.into()),
        }
    }

    /// Text that would be delivered, preferring the user-facing rendering
    pub fn delivery_text(&self) -> Option<&str> {
        match self {
            Self::Completed { for_llm, for_user } => for_user
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .or_else(|| Some(for_llm.as_str()).filter(|s| !s.trim().is_empty())),
            _ => None,
        }
    }

    /// Fold the silence sentinel and empty payloads into [`TurnResult::Silent`]
    pub fn normalize(self) -> Self {
        if matches!(self, Self::Completed { .. })
            && self.delivery_text().map_or(true, is_silent_reply)
        {
            return Self::Silent;
        }
        self
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Silent => "silent",
            Self::Error(_) => "error",
            Self::Async(_) => "async",
            Self::Completed { .. } => "completed",
        }
    }
}

/// Whether `text` is the silence sentinel
pub fn is_silent_reply(text: &str) -> bool {
    text.trim() == SILENT_SENTINEL
}
