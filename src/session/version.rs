//! Saga version tokens.

/// Version of a saga document as read in the current unit of work.
///
/// Obtained only by loading a saga; writes require the token recorded by
/// that load, so a write can never be issued against an unread version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SagaVersion(i32);

impl SagaVersion {
    /// Version of a freshly saved saga.
    pub const INITIAL: SagaVersion = SagaVersion(0);

    pub(crate) fn new(value: i32) -> Self {
        Self(value)
    }

    /// Stored value of the version element.
    pub fn value(&self) -> i32 {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for SagaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
