//! List document model
//!
//! The daemon's document is a JSON array. An insertion payload that is an
//! array appends each of its items, any other value is appended as is.
//! A deletion removes the first equal item for each value it names.

use flood_core::{Event, EventKind, Payload, Session};
use flood_protocol::Operation;
use flood_transport::Node;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub type SharedList = Arc<Mutex<ListDocument>>;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ListDocument {
    items: Vec<Value>,
}

impl ListDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, payload: &Payload) {
        match payload {
            Value::Array(items) => self.items.extend(items.iter().cloned()),
            other => self.items.push(other.clone()),
        }
    }

    /// Remove the named items. Returns how many were found.
    pub fn delete(&mut self, payload: &Payload) -> usize {
        let targets: Vec<&Value> = match payload {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        let mut removed = 0;
        for target in targets {
            if let Some(pos) = self.items.iter().position(|item| item == target) {
                self.items.remove(pos);
                removed += 1;
            }
        }
        removed
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Snapshot handed to joining peers
    pub fn snapshot(&self) -> Payload {
        Value::Array(self.items.clone())
    }
}

/// Apply `insertion` locally and publish the new snapshot
pub fn apply_insertion(document: &SharedList, session: &Session, payload: &Payload) {
    let mut doc = document.lock();
    doc.insert(payload);
    session.set_document_model(doc.snapshot());
}

/// Apply `deletion` locally and publish the new snapshot
pub fn apply_deletion(document: &SharedList, session: &Session, payload: &Payload) -> usize {
    let mut doc = document.lock();
    let removed = doc.delete(payload);
    session.set_document_model(doc.snapshot());
    removed
}

/// Keep `document` in step with local edits and the operations `node` delivers
pub fn track(node: &mut Node, document: SharedList, session: Arc<Session>) {
    let (doc, sess) = (document.clone(), session.clone());
    node.on_local_edit(move |operation| match operation {
        Operation::Insertion(payload) => apply_insertion(&doc, &sess, payload),
        Operation::Deletion(payload) => {
            if apply_deletion(&doc, &sess, payload) == 0 {
                debug!(payload = %payload, "Local deletion matched nothing");
            }
        }
    });

    let (doc, sess) = (document.clone(), session.clone());
    node.subscribe(EventKind::RemoteInsertion, move |event| {
        if let Event::RemoteInsertion(payload) = event {
            apply_insertion(&doc, &sess, payload);
            debug!(items = doc.lock().len(), "Applied remote insertion");
        }
    });

    node.subscribe(EventKind::RemoteDeletion, move |event| {
        if let Event::RemoteDeletion(payload) = event {
            let removed = apply_deletion(&document, &session, payload);
            debug!(removed, "Applied remote deletion");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use flood_core::SharedDocument;
    use serde_json::json;

    #[test]
    fn test_insert_appends() {
        let mut doc = ListDocument::new();
        doc.insert(&json!(["a", "b"]));
        doc.insert(&json!("c"));
        doc.insert(&json!([]));

        assert_eq!(doc.items(), &[json!("a"), json!("b"), json!("c")]);
    }

    #[test]
    fn test_delete_removes_first_match() {
        let mut doc = ListDocument::new();
        doc.insert(&json!(["a", "b", "a"]));

        assert_eq!(doc.delete(&json!("a")), 1);
        assert_eq!(doc.items(), &[json!("b"), json!("a")]);

        assert_eq!(doc.delete(&json!(["b", "missing"])), 1);
        assert_eq!(doc.snapshot(), json!(["a"]));
    }

    #[test]
    fn test_apply_updates_session_snapshot() {
        let document: SharedList = Arc::new(Mutex::new(ListDocument::new()));
        let session = Session::new("alice", "list");

        apply_insertion(&document, &session, &json!(["milk", "eggs"]));
        assert_eq!(session.document_model(), json!(["milk", "eggs"]));

        apply_deletion(&document, &session, &json!("milk"));
        assert_eq!(session.document_model(), json!(["eggs"]));
    }
}
