use chrono::Utc;
use uuid::Uuid;

use crate::middleware::auth::Claims;
use crate::middleware::error_handling::{AppError, Result};
use crate::models::enquiry::{
    CreateEnquiryRequest, EnquiryCreatedResponse, EnquiryResponse, EnquiryStatus,
    MessageCreatedResponse,
};
use crate::models::message::MessageResponse;
use crate::realtime::{RealtimeEvent, RealtimeHub};
use crate::repositories::EnquiryRepository;

/// Use-case layer over the enquiry store: access-control policy plus
/// realtime notification. The HTTP boundary calls only this type and never
/// re-derives permission semantics.
///
/// Realtime publication happens strictly after the store commit and is
/// best-effort: a room with no listeners or a lagging subscriber never
/// fails the write.
pub struct ChatService {
    enquiry_repo: EnquiryRepository,
    hub: RealtimeHub,
}

impl ChatService {
    pub fn new(enquiry_repo: EnquiryRepository, hub: RealtimeHub) -> Self {
        Self { enquiry_repo, hub }
    }

    /// Create an enquiry together with its first message.
    ///
    /// The participant set starts as just the sender; staff join later by
    /// replying. Submissions that filled the hidden honeypot field are
    /// rejected before anything touches the store.
    pub async fn create_enquiry_with_message(
        &self,
        request: CreateEnquiryRequest,
        claims: &Claims,
    ) -> Result<EnquiryCreatedResponse> {
        reject_honeypot(&request)?;

        let participants = vec![claims.user_id];
        let (enquiry, message) = self
            .enquiry_repo
            .create_enquiry(
                &participants,
                request.property_id,
                &request.contact,
                &request.body,
                claims.user_id,
            )
            .await?;

        tracing::info!("Enquiry {} created by user {}", enquiry.id, claims.user_id);

        let message = MessageResponse::new(message, Vec::new());
        self.hub
            .publish(
                enquiry.id,
                RealtimeEvent::MessageCreated {
                    enquiry_id: enquiry.id,
                    message: message.clone(),
                    unread_counts: enquiry.unread_counts.clone(),
                },
            )
            .await;

        Ok(EnquiryCreatedResponse {
            enquiry: enquiry.into(),
            message,
        })
    }

    /// Append a message to an enquiry thread.
    ///
    /// Staff may reply to any enquiry and are added to the participant set
    /// by doing so; ordinary users must already be participants.
    pub async fn append_message(
        &self,
        enquiry_id: Uuid,
        body: &str,
        claims: &Claims,
    ) -> Result<MessageCreatedResponse> {
        if body.trim().is_empty() {
            return Err(AppError::BadRequest("Message cannot be empty".to_string()));
        }

        // Unknown enquiry surfaces as 404 before any join side effect
        self.enquiry_repo
            .find_by_id(enquiry_id)
            .await?
            .ok_or(AppError::NotFound("Enquiry not found".to_string()))?;

        if claims.is_staff() {
            self.enquiry_repo
                .add_participant(enquiry_id, claims.user_id)
                .await?;
        }

        let (message, enquiry) = self
            .enquiry_repo
            .append_message(enquiry_id, claims.user_id, body)
            .await?;

        let message = MessageResponse::new(message, Vec::new());
        self.hub
            .publish(
                enquiry_id,
                RealtimeEvent::MessageCreated {
                    enquiry_id,
                    message: message.clone(),
                    unread_counts: enquiry.unread_counts.clone(),
                },
            )
            .await;

        Ok(MessageCreatedResponse {
            message,
            enquiry: enquiry.into(),
        })
    }

    /// Acknowledge the whole thread for the calling user and clear their
    /// unread badge contribution. Idempotent.
    pub async fn mark_enquiry_read(&self, enquiry_id: Uuid, claims: &Claims) -> Result<EnquiryResponse> {
        let enquiry = self.enquiry_repo.mark_read(enquiry_id, claims.user_id).await?;

        self.hub
            .publish(
                enquiry_id,
                RealtimeEvent::ReadReceipt {
                    enquiry_id,
                    user_id: claims.user_id,
                    read_at: Utc::now(),
                },
            )
            .await;

        Ok(enquiry.into())
    }

    pub async fn list_enquiries(&self, claims: &Claims) -> Result<Vec<EnquiryResponse>> {
        let enquiries = self
            .enquiry_repo
            .list_for_user(claims.user_id, claims.is_staff())
            .await?;

        Ok(enquiries.into_iter().map(Into::into).collect())
    }

    pub async fn get_messages(&self, enquiry_id: Uuid, claims: &Claims) -> Result<Vec<MessageResponse>> {
        self.enquiry_repo
            .get_messages(enquiry_id, claims.user_id, claims.is_staff())
            .await
    }

    pub async fn unread_total(&self, claims: &Claims) -> Result<i64> {
        self.enquiry_repo.unread_total(claims.user_id).await
    }

    /// Status transitions are staff-driven; the originating user can never
    /// move an enquiry out of `new`.
    pub async fn update_status(
        &self,
        enquiry_id: Uuid,
        status: EnquiryStatus,
        claims: &Claims,
    ) -> Result<EnquiryResponse> {
        require_staff(claims)?;

        let enquiry = self.enquiry_repo.update_status(enquiry_id, status).await?;
        tracing::info!(
            "Enquiry {} moved to {} by staff {}",
            enquiry_id,
            status.as_str(),
            claims.user_id
        );

        Ok(enquiry.into())
    }
}

fn require_staff(claims: &Claims) -> Result<()> {
    if claims.is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Staff access required".to_string()))
    }
}

/// Bot deterrence: the `website` field is hidden in the form, so any
/// non-empty value means an automated submission. Rejected before any
/// store call so nothing is persisted.
fn reject_honeypot(request: &CreateEnquiryRequest) -> Result<()> {
    match request.website.as_deref() {
        Some(value) if !value.trim().is_empty() => {
            tracing::warn!("Honeypot tripped on enquiry submission");
            Err(AppError::BadRequest("Invalid submission".to_string()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enquiry::ContactInfo;
    use crate::models::user::UserRole;

    fn request(website: Option<&str>) -> CreateEnquiryRequest {
        CreateEnquiryRequest {
            property_id: None,
            body: "Is this available?".to_string(),
            contact: ContactInfo {
                name: "Ana Almeida".to_string(),
                email: "ana@example.com".to_string(),
                phone: None,
            },
            website: website.map(str::to_string),
        }
    }

    fn claims(role: UserRole) -> Claims {
        Claims {
            sub: Uuid::new_v4().to_string(),
            user_id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            full_name: "Test".to_string(),
            role,
            exp: 9999999999,
            iat: 1234567890,
        }
    }

    #[test]
    fn test_honeypot_rejects_filled_field() {
        let err = reject_honeypot(&request(Some("https://spam.example"))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref msg) if msg == "Invalid submission"));
    }

    #[test]
    fn test_honeypot_allows_empty_or_missing_field() {
        assert!(reject_honeypot(&request(None)).is_ok());
        assert!(reject_honeypot(&request(Some(""))).is_ok());
        assert!(reject_honeypot(&request(Some("   "))).is_ok());
    }

    #[test]
    fn test_status_transitions_require_staff() {
        assert!(require_staff(&claims(UserRole::Admin)).is_ok());
        assert!(require_staff(&claims(UserRole::Assistant)).is_ok());
        assert!(matches!(
            require_staff(&claims(UserRole::User)).unwrap_err(),
            AppError::Forbidden(_)
        ));
    }
}
