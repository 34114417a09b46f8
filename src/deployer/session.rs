//! Per-run naming state.

use chrono::{DateTime, Utc};

const IDENTITY_TIMESTAMP: &str = "%Y%m%dT%H%M%SZ";

/// Names shared by every resource a run touches.
///
/// Before [`Session::finalize`] the identity is the configured base name, which
/// lets `down` and `is_up` address an instance created by an earlier process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    base_name: String,
    identity: String,
    configured_key: Option<String>,
    generated_key: Option<String>,
}

impl Session {
    /// Starts a session for `base_name`. `configured_key` is the SSH key name
    /// supplied by the operator, if any.
    #[must_use]
    pub fn new(base_name: &str, configured_key: Option<&str>) -> Self {
        Self {
            base_name: base_name.to_owned(),
            identity: base_name.to_owned(),
            configured_key: configured_key.map(str::to_owned),
            generated_key: None,
        }
    }

    /// Derives a fresh identity from the base name and `now`. Previously
    /// generated key names are forgotten because they belong to the old
    /// identity.
    pub fn finalize(&mut self, now: DateTime<Utc>) {
        self.identity = format!("{}-{}", self.base_name, now.format(IDENTITY_TIMESTAMP));
        self.generated_key = None;
    }

    /// Records that a key named after the current identity was generated and
    /// returns that name.
    pub fn adopt_generated_key(&mut self) -> &str {
        self.generated_key.insert(self.identity.clone()).as_str()
    }

    /// Configured base name.
    #[must_use]
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Canonical identity used for instance names, key names, and file paths.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Key name supplied by the operator.
    #[must_use]
    pub fn configured_key(&self) -> Option<&str> {
        self.configured_key.as_deref()
    }

    /// Key name in effect for this run, if one is known yet.
    #[must_use]
    pub fn key_name(&self) -> Option<&str> {
        self.configured_key
            .as_deref()
            .or(self.generated_key.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or_else(|| panic!("invalid timestamp {secs}"))
    }

    #[test]
    fn identity_defaults_to_base_name() {
        let session = Session::new("kubetest2-lambda", None);
        assert_eq!(session.identity(), "kubetest2-lambda");
        assert_eq!(session.key_name(), None);
    }

    #[test]
    fn finalize_appends_compact_utc_timestamp() {
        let mut session = Session::new("run", None);
        session.finalize(at(1_735_689_600));
        assert_eq!(session.identity(), "run-20250101T000000Z");
    }

    #[test]
    fn repeated_finalize_does_not_stack_suffixes() {
        let mut session = Session::new("run", None);
        session.finalize(at(1_735_689_600));
        session.finalize(at(1_735_689_661));
        assert_eq!(session.identity(), "run-20250101T000101Z");
        assert_eq!(session.base_name(), "run");
    }

    #[test]
    fn generated_key_follows_identity_and_resets() {
        let mut session = Session::new("run", None);
        session.finalize(at(0));
        assert_eq!(session.adopt_generated_key(), "run-19700101T000000Z");
        assert_eq!(session.key_name(), Some("run-19700101T000000Z"));

        session.finalize(at(1));
        assert_eq!(session.key_name(), None);
    }

    #[test]
    fn configured_key_takes_precedence() {
        let mut session = Session::new("run", Some("custom-key"));
        session.finalize(at(0));
        assert_eq!(session.key_name(), Some("custom-key"));
        assert_eq!(session.configured_key(), Some("custom-key"));
    }
}
