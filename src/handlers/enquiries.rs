use axum::{
    extract::{Extension, Path, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::AppConfig,
    middleware::{error_handling::Result, Claims},
    models::enquiry::{
        CreateEnquiryRequest, EnquiryCreatedResponse, EnquiryResponse, MessageCreatedResponse,
        UpdateEnquiryStatusRequest,
    },
    models::message::{CreateMessageRequest, MessageResponse},
    repositories::EnquiryRepository,
    services::ChatService,
};

fn chat_service(config: &AppConfig) -> ChatService {
    ChatService::new(
        EnquiryRepository::new(config.database_pool.clone()),
        config.realtime.clone(),
    )
}

/// Create a new enquiry with its first message.
pub async fn create_enquiry(
    State(config): State<AppConfig>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<CreateEnquiryRequest>,
) -> Result<Json<EnquiryCreatedResponse>> {
    request.validate()?;

    let created = chat_service(&config)
        .create_enquiry_with_message(request, &claims)
        .await?;

    Ok(Json(created))
}

/// Enquiries visible to the caller, newest conversation first.
pub async fn list_enquiries(
    State(config): State<AppConfig>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<EnquiryResponse>>> {
    let enquiries = chat_service(&config).list_enquiries(&claims).await?;

    Ok(Json(enquiries))
}

/// Full thread in conversation order.
pub async fn get_enquiry_messages(
    State(config): State<AppConfig>,
    Extension(claims): Extension<Claims>,
    Path(enquiry_id): Path<Uuid>,
) -> Result<Json<Vec<MessageResponse>>> {
    let messages = chat_service(&config).get_messages(enquiry_id, &claims).await?;

    Ok(Json(messages))
}

/// Reply in an enquiry thread.
pub async fn create_message(
    State(config): State<AppConfig>,
    Extension(claims): Extension<Claims>,
    Path(enquiry_id): Path<Uuid>,
    Json(request): Json<CreateMessageRequest>,
) -> Result<Json<MessageCreatedResponse>> {
    request.validate()?;

    let created = chat_service(&config)
        .append_message(enquiry_id, &request.body, &claims)
        .await?;

    Ok(Json(created))
}

/// Acknowledge the whole thread for the caller (clears their badge count).
pub async fn mark_enquiry_read(
    State(config): State<AppConfig>,
    Extension(claims): Extension<Claims>,
    Path(enquiry_id): Path<Uuid>,
) -> Result<Json<EnquiryResponse>> {
    let enquiry = chat_service(&config)
        .mark_enquiry_read(enquiry_id, &claims)
        .await?;

    Ok(Json(enquiry))
}

/// Total unread messages for the caller across all their threads.
pub async fn get_unread_count(
    State(config): State<AppConfig>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>> {
    let count = chat_service(&config).unread_total(&claims).await?;

    Ok(Json(serde_json::json!({ "count": count })))
}

/// Staff-only status transition (new -> contacted -> closed).
pub async fn update_enquiry_status(
    State(config): State<AppConfig>,
    Extension(claims): Extension<Claims>,
    Path(enquiry_id): Path<Uuid>,
    Json(request): Json<UpdateEnquiryStatusRequest>,
) -> Result<Json<EnquiryResponse>> {
    let enquiry = chat_service(&config)
        .update_status(enquiry_id, request.status, &claims)
        .await?;

    Ok(Json(enquiry))
}
