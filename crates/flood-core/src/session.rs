//! Shared session state - title, alias, participants and document snapshot

use crate::events::Payload;
use crate::site::SiteId;
use parking_lot::RwLock;

/// Shared-document provider consumed by the protocol engine
pub trait SharedDocument: Send + Sync {
    /// Alias of the local user
    fn alias(&self) -> String;

    fn document_title(&self) -> String;

    fn set_document_title(&self, title: String);

    /// Full snapshot of the document, sent to joining peers
    fn document_model(&self) -> Payload;

    /// Register (or rename) a remote participant
    fn add_participant(&self, site: SiteId, alias: String);

    fn remove_participant(&self, site: &SiteId);

    fn participants(&self) -> Vec<Participant>;
}

/// A remote user taking part in the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub site: SiteId,
    pub alias: String,
}

#[derive(Debug)]
struct SessionState {
    title: String,
    document: Payload,
    participants: Vec<Participant>,
}

/// In-memory session, shared between the engine and the embedding application
#[derive(Debug)]
pub struct Session {
    alias: String,
    state: RwLock<SessionState>,
}

impl Session {
    /// Create a session with an empty document
    pub fn new(alias: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            state: RwLock::new(SessionState {
                title: title.into(),
                document: Payload::Array(Vec::new()),
                participants: Vec::new(),
            }),
        }
    }

    /// Replace the document snapshot handed to joining peers
    pub fn set_document_model(&self, document: Payload) {
        self.state.write().document = document;
    }
}

impl SharedDocument for Session {
    fn alias(&self) -> String {
        self.alias.clone()
    }

    fn document_title(&self) -> String {
        self.state.read().title.clone()
    }

    fn set_document_title(&self, title: String) {
        self.state.write().title = title;
    }

    fn document_model(&self) -> Payload {
        self.state.read().document.clone()
    }

    fn add_participant(&self, site: SiteId, alias: String) {
        let mut state = self.state.write();
        match state.participants.iter_mut().find(|p| p.site == site) {
            Some(existing) => existing.alias = alias,
            None => state.participants.push(Participant { site, alias }),
        }
    }

    fn remove_participant(&self, site: &SiteId) {
        self.state.write().participants.retain(|p| &p.site != site);
    }

    fn participants(&self) -> Vec<Participant> {
        self.state.read().participants.clone()
    }
}
