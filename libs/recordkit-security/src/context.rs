use std::collections::BTreeSet;

use crate::identity;

/// `SecurityContext` carries the resolved identities of the caller.
///
/// Built by whatever authenticates the request (the engine never does) and
/// passed to every record operation. Permission rules are matched against
/// [`SecurityContext::identities`].
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SecurityContext {
    /// Subject ID of the authenticated user or service.
    subject_id: Option<String>,
    /// Verified email address, used as the principal when present.
    email: Option<String>,
    /// Every identity string the caller holds (`sub:`, `email:`, `role:`, raw).
    #[serde(default)]
    identities: BTreeSet<String>,
}

impl SecurityContext {
    /// Create a new `SecurityContext` builder
    #[must_use]
    pub fn builder() -> SecurityContextBuilder {
        SecurityContextBuilder::default()
    }

    /// Create an anonymous `SecurityContext` with no identities.
    ///
    /// Anonymous callers only match wildcard rules.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Build a context from raw identity strings, deriving the subject and
    /// email from their prefixes.
    #[must_use]
    pub fn from_identities<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        identities
            .into_iter()
            .fold(SecurityContextBuilder::default(), |b, id| b.identity(id))
            .build()
    }

    #[must_use]
    pub fn subject_id(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    #[must_use]
    pub fn identities(&self) -> &BTreeSet<String> {
        &self.identities
    }

    /// Name recorded as `creator` / `editor`: the email, else the subject id.
    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        self.email().or_else(|| self.subject_id())
    }
}

#[derive(Default)]
pub struct SecurityContextBuilder {
    subject_id: Option<String>,
    email: Option<String>,
    identities: BTreeSet<String>,
}

impl SecurityContextBuilder {
    #[must_use]
    pub fn subject_id(mut self, subject_id: &str) -> Self {
        self.identities.insert(identity::subject(subject_id));
        self.subject_id = Some(subject_id.to_owned());
        self
    }

    #[must_use]
    pub fn email(mut self, email: &str) -> Self {
        self.identities.insert(identity::email(email));
        self.email = Some(email.to_owned());
        self
    }

    #[must_use]
    pub fn role(mut self, role: &str) -> Self {
        self.identities.insert(identity::role(role));
        self
    }

    /// Add a raw identity string. Prefixed identities also populate the
    /// matching typed attribute.
    #[must_use]
    pub fn identity(self, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if let Some(id) = raw.strip_prefix(identity::SUBJECT_PREFIX) {
            let id = id.to_owned();
            return self.subject_id(&id);
        }
        if let Some(address) = raw.strip_prefix(identity::EMAIL_PREFIX) {
            let address = address.to_owned();
            return self.email(&address);
        }
        if let Some(name) = raw.strip_prefix(identity::ROLE_PREFIX) {
            let name = name.to_owned();
            return self.role(&name);
        }
        let mut this = self;
        this.identities.insert(raw);
        this
    }

    #[must_use]
    pub fn build(self) -> SecurityContext {
        SecurityContext {
            subject_id: self.subject_id,
            email: self.email,
            identities: self.identities,
        }
    }
}
