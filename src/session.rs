use std::time::Instant;

/// Per-session security state, passed explicitly into token operations.
///
/// The host runtime owns one of these per authenticated session and is
/// responsible for serializing concurrent access to it (its usual
/// session-locking discipline). Nothing here is shared across sessions.
#[derive(Debug, Default)]
pub struct SessionContext {
    pub(crate) csrf_token: Option<CsrfToken>,
}

#[derive(Debug, Clone)]
pub(crate) struct CsrfToken {
    pub value: String,
    pub issued_at: Instant,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a CSRF token is currently stored (regardless of age).
    pub fn has_csrf_token(&self) -> bool {
        self.csrf_token.is_some()
    }

    /// Drop all session security state (logout).
    pub fn clear(&mut self) {
        self.csrf_token = None;
    }
}
