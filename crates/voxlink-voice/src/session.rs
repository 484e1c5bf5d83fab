//! The logical conversation with the voice service.
//!
//! A `Session` outlives every transport opened on its behalf: it is created
//! once, toggled between wanting and not wanting a connection, and carries
//! the resume token from one transport to the next.

use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct Session {
    /// The user wants to be connected. Governs auto-reconnect.
    pub intended_connected: bool,
    resume_group_id: Option<String>,
    resume_enabled: bool,
}

impl Session {
    pub fn new(resume_enabled: bool) -> Self {
        Self {
            intended_connected: false,
            resume_group_id: None,
            resume_enabled,
        }
    }

    pub fn resume_enabled(&self) -> bool {
        self.resume_enabled
    }

    pub fn resume_group_id(&self) -> Option<&str> {
        self.resume_group_id.as_deref()
    }

    /// Records the resume token from a connection's metadata event.
    pub fn store_resume_token(&mut self, group_id: impl Into<String>) {
        let group_id = group_id.into();
        debug!(resume_group_id = %group_id, "stored resume token");
        self.resume_group_id = Some(group_id);
    }

    /// Token to pass to the next connect, if resumption is allowed.
    pub fn resume_token_for_connect(&self) -> Option<String> {
        if self.resume_enabled {
            self.resume_group_id.clone()
        } else {
            None
        }
    }

    /// Drops the resume token unless resumption is enabled.
    pub fn forget_resume_token_if_disabled(&mut self) {
        if !self.resume_enabled {
            self.resume_group_id = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_offered_only_when_enabled() {
        let mut enabled = Session::new(true);
        assert_eq!(enabled.resume_token_for_connect(), None);
        enabled.store_resume_token("grp-1");
        assert_eq!(enabled.resume_token_for_connect().as_deref(), Some("grp-1"));

        let mut disabled = Session::new(false);
        disabled.store_resume_token("grp-2");
        assert_eq!(disabled.resume_token_for_connect(), None);
        assert_eq!(disabled.resume_group_id(), Some("grp-2"));
    }

    #[test]
    fn forgetting_keeps_token_when_enabled() {
        let mut enabled = Session::new(true);
        enabled.store_resume_token("grp-1");
        enabled.forget_resume_token_if_disabled();
        assert_eq!(enabled.resume_group_id(), Some("grp-1"));

        let mut disabled = Session::new(false);
        disabled.store_resume_token("grp-2");
        disabled.forget_resume_token_if_disabled();
        assert_eq!(disabled.resume_group_id(), None);
    }

    #[test]
    fn newer_token_replaces_older() {
        let mut session = Session::new(true);
        session.store_resume_token("grp-1");
        session.store_resume_token("grp-2");
        assert_eq!(session.resume_group_id(), Some("grp-2"));
    }
}
