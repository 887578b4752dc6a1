use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::message::MessageResponse;

/// Enquiry lifecycle. Starts at `New`; transitions are staff-driven and the
/// originating user can never change it. Closing is a status change, not a
/// delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnquiryStatus {
    New,
    Contacted,
    Closed,
}

impl EnquiryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnquiryStatus::New => "new",
            EnquiryStatus::Contacted => "contacted",
            EnquiryStatus::Closed => "closed",
        }
    }
}

impl std::str::FromStr for EnquiryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "new" => Ok(EnquiryStatus::New),
            "contacted" => Ok(EnquiryStatus::Contacted),
            "closed" => Ok(EnquiryStatus::Closed),
            other => Err(format!("unknown enquiry status: {}", other)),
        }
    }
}

/// Contact details captured when the enquiry is created. This is a snapshot:
/// later profile edits do not touch it.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ContactInfo {
    #[validate(length(min = 2, message = "Name must be at least 2 characters"))]
    pub name: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(max = 50, message = "Phone number too long"))]
    pub phone: Option<String>,
}

/// A conversation thread tied to a property enquiry, with its participant
/// set and per-participant unread counters loaded alongside the row.
#[derive(Debug, Clone, Serialize)]
pub struct Enquiry {
    pub id: Uuid,
    pub property_id: Option<Uuid>,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: Option<String>,
    pub status: EnquiryStatus,
    pub participants: Vec<Uuid>,
    pub unread_counts: HashMap<Uuid, i32>,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEnquiryRequest {
    pub property_id: Option<Uuid>,
    #[validate(length(min = 1, max = 2000, message = "Message must be between 1 and 2000 characters"))]
    pub body: String,
    #[validate(nested)]
    pub contact: ContactInfo,
    /// Honeypot. Hidden in the form; humans leave it empty, bots fill it in.
    pub website: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateEnquiryStatusRequest {
    pub status: EnquiryStatus,
}

#[derive(Debug, Serialize, Clone)]
pub struct EnquiryResponse {
    pub id: Uuid,
    pub property_id: Option<Uuid>,
    pub contact: ContactInfo,
    pub status: EnquiryStatus,
    pub participants: Vec<Uuid>,
    pub unread_count_by_user: HashMap<Uuid, i32>,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
}

impl From<Enquiry> for EnquiryResponse {
    fn from(enquiry: Enquiry) -> Self {
        Self {
            id: enquiry.id,
            property_id: enquiry.property_id,
            contact: ContactInfo {
                name: enquiry.contact_name,
                email: enquiry.contact_email,
                phone: enquiry.contact_phone,
            },
            status: enquiry.status,
            participants: enquiry.participants,
            unread_count_by_user: enquiry.unread_counts,
            created_at: enquiry.created_at,
            last_message_at: enquiry.last_message_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EnquiryCreatedResponse {
    pub enquiry: EnquiryResponse,
    pub message: MessageResponse,
}

#[derive(Debug, Serialize)]
pub struct MessageCreatedResponse {
    pub message: MessageResponse,
    pub enquiry: EnquiryResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [EnquiryStatus::New, EnquiryStatus::Contacted, EnquiryStatus::Closed] {
            assert_eq!(status.as_str().parse::<EnquiryStatus>().unwrap(), status);
        }
        assert!("reopened".parse::<EnquiryStatus>().is_err());
    }

    #[test]
    fn test_unread_counts_serialize_as_map() {
        let user = Uuid::new_v4();
        let enquiry = Enquiry {
            id: Uuid::new_v4(),
            property_id: None,
            contact_name: "Ana Almeida".into(),
            contact_email: "ana@example.com".into(),
            contact_phone: None,
            status: EnquiryStatus::New,
            participants: vec![user],
            unread_counts: HashMap::from([(user, 3)]),
            created_at: Utc::now(),
            last_message_at: Utc::now(),
        };

        let value = serde_json::to_value(EnquiryResponse::from(enquiry)).unwrap();
        assert_eq!(value["status"], "new");
        assert_eq!(value["unread_count_by_user"][user.to_string().as_str()], 3);
    }
}
