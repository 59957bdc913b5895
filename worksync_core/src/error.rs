use std::error::Error as StdError;

/// Common error type for `worksync_core`.
///
/// Store and client implementations should preserve the underlying error
/// chain where possible via `Error::backend`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("sync cancelled")]
    Cancelled,

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

impl Error {
    #[tracing::instrument(level = "debug", name = "worksync.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Convenience: wrap a sqlx error with "sqlite" context.
    pub fn backend_sqlx(source: sqlx::Error) -> Self {
        Self::Backend {
            context: "sqlite".into(),
            source: Box::new(source),
        }
    }

    /// Message recorded in `SyncState::last_error`, including the source chain.
    pub fn full_message(&self) -> String {
        let mut out = self.to_string();
        let mut cur = StdError::source(self);
        while let Some(src) = cur {
            out.push_str(": ");
            out.push_str(&src.to_string());
            cur = src.source();
        }
        out
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_message_includes_source_chain() {
        let io = std::io::Error::other("connection reset");
        let err = Error::backend("fetch work item details", io);
        assert_eq!(
            err.full_message(),
            "backend error: fetch work item details: connection reset"
        );
    }

    #[test]
    fn full_message_without_source_is_display() {
        assert_eq!(Error::Cancelled.full_message(), "sync cancelled");
    }
}
