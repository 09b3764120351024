use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::dao::models::{Revision, RoomState, Versioned};

pub const ROOM_PREFIX: &str = "room::";

/// Room document; `_rev` doubles as the compare-and-swap revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchRoomDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub room: RoomState,
    pub updated_at: SystemTime,
}

impl CouchRoomDocument {
    pub fn new(room_id: &str, rev: Option<String>, room: RoomState) -> Self {
        Self {
            id: room_doc_id(room_id),
            rev,
            room,
            updated_at: SystemTime::now(),
        }
    }

    /// Attach the revision CouchDB assigned to this write.
    pub fn into_versioned(self, rev: String) -> Versioned {
        Versioned {
            revision: Revision::new(rev),
            state: self.room,
            updated_at: self.updated_at,
        }
    }
}

/// Body CouchDB answers a successful `PUT` with.
#[derive(Debug, Deserialize)]
pub struct PutResponse {
    pub rev: String,
}

pub fn room_doc_id(room_id: &str) -> String {
    format!("{ROOM_PREFIX}{room_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_flattens_room_fields() {
        let document = CouchRoomDocument::new("r1", None, RoomState::fresh());
        let value = serde_json::to_value(&document).unwrap();
        assert_eq!(value["_id"], "room::r1");
        assert!(value.get("_rev").is_none());
        assert_eq!(value["round"], 0);
        assert_eq!(value["status"], "IN_PROGRESS");
    }
}
