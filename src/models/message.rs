use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// One utterance in an enquiry thread. Immutable once created; the enquiry
/// owns its messages and deleting the enquiry cascades to them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub enquiry_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMessageRequest {
    #[validate(length(min = 1, max = 2000, message = "Message must be between 1 and 2000 characters"))]
    pub body: String,
}

/// Message as returned to clients, carrying the acknowledgement set.
/// The sender is implicitly considered to have read its own message and is
/// never listed in `read_by`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub enquiry_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read_by: Vec<Uuid>,
}

impl MessageResponse {
    pub fn new(message: Message, read_by: Vec<Uuid>) -> Self {
        Self {
            id: message.id,
            enquiry_id: message.enquiry_id,
            sender_id: message.sender_id,
            body: message.body,
            created_at: message.created_at,
            read_by,
        }
    }
}
