use indexmap::IndexMap;
use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};

use crate::dao::models::{
    ParticipantId, ParticipantState, Revision, RoomState, RoomStatus, Versioned,
};

/// One room per document; `version` is bumped by every write and drives compare-and-swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoomDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub version: i64,
    pub round: u32,
    pub status: RoomStatus,
    #[serde(default)]
    pub participants: IndexMap<ParticipantId, ParticipantState>,
    pub updated_at: DateTime,
}

impl MongoRoomDocument {
    pub fn new(room_id: &str, version: i64, state: RoomState) -> Self {
        Self {
            id: room_id.to_owned(),
            version,
            round: state.round,
            status: state.status,
            participants: state.participants,
            updated_at: DateTime::now(),
        }
    }
}

impl From<MongoRoomDocument> for Versioned {
    fn from(value: MongoRoomDocument) -> Self {
        Self {
            revision: Revision::from_counter(value.version.max(0) as u64),
            state: RoomState {
                round: value.round,
                status: value.status,
                participants: value.participants,
            },
            updated_at: value.updated_at.to_system_time(),
        }
    }
}

pub fn doc_id(room_id: &str) -> Document {
    doc! {"_id": room_id}
}

pub fn doc_id_at(room_id: &str, version: i64) -> Document {
    doc! {"_id": room_id, "version": version}
}
