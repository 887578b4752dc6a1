use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, query, PgPool, Row};
use uuid::Uuid;

use crate::middleware::error_handling::{AppError, Result};
use crate::models::enquiry::{ContactInfo, Enquiry, EnquiryStatus};
use crate::models::message::{Message, MessageResponse};

/// Durable state and invariant enforcement for enquiry threads.
///
/// All counter updates run as atomic SQL against the participant rows
/// (`unread_count = unread_count + 1`, `unread_count = 0`), so concurrent
/// writers against the same enquiry are linearized by the database rather
/// than by read-modify-write at this layer. Message `created_at` is assigned
/// by the database at commit time and is the source of truth for thread
/// ordering.
pub struct EnquiryRepository {
    pool: PgPool,
}

impl EnquiryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create an enquiry atomically with its first message.
    ///
    /// Both rows are written in a single transaction: a crash can never
    /// leave an enquiry without its first message, nor a dangling message.
    /// Participants other than the sender start with one unread message.
    pub async fn create_enquiry(
        &self,
        participants: &[Uuid],
        property_id: Option<Uuid>,
        contact: &ContactInfo,
        first_message: &str,
        sender_id: Uuid,
    ) -> Result<(Enquiry, Message)> {
        if participants.is_empty() {
            return Err(AppError::BadRequest("Participants cannot be empty".to_string()));
        }
        if !participants.contains(&sender_id) {
            return Err(AppError::BadRequest("Sender must be a participant".to_string()));
        }
        let body = first_message.trim();
        if body.is_empty() {
            return Err(AppError::BadRequest("Message cannot be empty".to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let row = query(
            r#"
            INSERT INTO enquiries (property_id, contact_name, contact_email, contact_phone)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(property_id)
        .bind(&contact.name)
        .bind(&contact.email)
        .bind(&contact.phone)
        .fetch_one(&mut *tx)
        .await?;

        let enquiry_id: Uuid = row.try_get("id")?;

        for user_id in participants {
            query(
                r#"
                INSERT INTO enquiry_participants (enquiry_id, user_id)
                VALUES ($1, $2)
                ON CONFLICT (enquiry_id, user_id) DO NOTHING
                "#,
            )
            .bind(enquiry_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        let message_row = query(
            r#"
            INSERT INTO messages (enquiry_id, sender_id, body)
            VALUES ($1, $2, $3)
            RETURNING id, created_at
            "#,
        )
        .bind(enquiry_id)
        .bind(sender_id)
        .bind(body)
        .fetch_one(&mut *tx)
        .await?;

        let message = Message {
            id: message_row.try_get("id")?,
            enquiry_id,
            sender_id,
            body: body.to_string(),
            created_at: message_row.try_get("created_at")?,
        };

        query(
            "UPDATE enquiry_participants SET unread_count = unread_count + 1
             WHERE enquiry_id = $1 AND user_id <> $2",
        )
        .bind(enquiry_id)
        .bind(sender_id)
        .execute(&mut *tx)
        .await?;

        query("UPDATE enquiries SET last_message_at = $2 WHERE id = $1")
            .bind(enquiry_id)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let enquiry = self
            .find_by_id(enquiry_id)
            .await?
            .ok_or(AppError::NotFound("Enquiry not found".to_string()))?;

        Ok((enquiry, message))
    }

    /// Append a message to an existing enquiry.
    ///
    /// Increments `unread_count` for every participant except the sender and
    /// bumps `last_message_at`, all in one transaction with the insert.
    pub async fn append_message(
        &self,
        enquiry_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> Result<(Message, Enquiry)> {
        self.require_enquiry(enquiry_id).await?;

        if !self.is_participant(enquiry_id, sender_id).await? {
            return Err(AppError::Forbidden("You are not part of this enquiry".to_string()));
        }

        let body = body.trim();
        if body.is_empty() {
            return Err(AppError::BadRequest("Message cannot be empty".to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let message_row = query(
            r#"
            INSERT INTO messages (enquiry_id, sender_id, body)
            VALUES ($1, $2, $3)
            RETURNING id, created_at
            "#,
        )
        .bind(enquiry_id)
        .bind(sender_id)
        .bind(body)
        .fetch_one(&mut *tx)
        .await?;

        let message = Message {
            id: message_row.try_get("id")?,
            enquiry_id,
            sender_id,
            body: body.to_string(),
            created_at: message_row.try_get("created_at")?,
        };

        query(
            "UPDATE enquiry_participants SET unread_count = unread_count + 1
             WHERE enquiry_id = $1 AND user_id <> $2",
        )
        .bind(enquiry_id)
        .bind(sender_id)
        .execute(&mut *tx)
        .await?;

        query("UPDATE enquiries SET last_message_at = $2 WHERE id = $1")
            .bind(enquiry_id)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let enquiry = self
            .find_by_id(enquiry_id)
            .await?
            .ok_or(AppError::NotFound("Enquiry not found".to_string()))?;

        Ok((message, enquiry))
    }

    /// Acknowledge every message in the thread for one participant.
    ///
    /// Idempotent: the counter is set (not decremented) to zero, and read
    /// rows are inserted with ON CONFLICT DO NOTHING, so a repeat call is a
    /// no-op. A sender never needs a read row for its own messages.
    pub async fn mark_read(&self, enquiry_id: Uuid, user_id: Uuid) -> Result<Enquiry> {
        self.require_enquiry(enquiry_id).await?;

        if !self.is_participant(enquiry_id, user_id).await? {
            return Err(AppError::Forbidden("You are not part of this enquiry".to_string()));
        }

        let mut tx = self.pool.begin().await?;

        query(
            "UPDATE enquiry_participants SET unread_count = 0
             WHERE enquiry_id = $1 AND user_id = $2",
        )
        .bind(enquiry_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        query(
            r#"
            INSERT INTO message_reads (message_id, user_id)
            SELECT m.id, $2 FROM messages m
            WHERE m.enquiry_id = $1 AND m.sender_id <> $2
            ON CONFLICT (message_id, user_id) DO NOTHING
            "#,
        )
        .bind(enquiry_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.find_by_id(enquiry_id)
            .await?
            .ok_or(AppError::NotFound("Enquiry not found".to_string()))
    }

    /// Add a user to the participant set. Safe to call when already present.
    pub async fn add_participant(&self, enquiry_id: Uuid, user_id: Uuid) -> Result<()> {
        query(
            r#"
            INSERT INTO enquiry_participants (enquiry_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (enquiry_id, user_id) DO NOTHING
            "#,
        )
        .bind(enquiry_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn is_participant(&self, enquiry_id: Uuid, user_id: Uuid) -> Result<bool> {
        let row = query(
            "SELECT EXISTS(
                SELECT 1 FROM enquiry_participants
                WHERE enquiry_id = $1 AND user_id = $2
             ) as is_participant",
        )
        .bind(enquiry_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<bool, _>("is_participant").unwrap_or(false))
    }

    pub async fn find_by_id(&self, enquiry_id: Uuid) -> Result<Option<Enquiry>> {
        let row = query(
            "SELECT id, property_id, contact_name, contact_email, contact_phone,
                    status, created_at, last_message_at
             FROM enquiries WHERE id = $1",
        )
        .bind(enquiry_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut participants_by_enquiry = self.load_participants(&[enquiry_id]).await?;
        let (participants, unread_counts) =
            participants_by_enquiry.remove(&enquiry_id).unwrap_or_default();

        Ok(Some(enquiry_from_row(&row, participants, unread_counts)?))
    }

    /// Enquiries visible to a user, newest conversation first. Staff see
    /// every enquiry; ordinary users only threads they participate in.
    pub async fn list_for_user(&self, user_id: Uuid, staff: bool) -> Result<Vec<Enquiry>> {
        let rows = if staff {
            query(
                "SELECT id, property_id, contact_name, contact_email, contact_phone,
                        status, created_at, last_message_at
                 FROM enquiries
                 ORDER BY last_message_at DESC",
            )
            .fetch_all(&self.pool)
            .await?
        } else {
            query(
                r#"
                SELECT e.id, e.property_id, e.contact_name, e.contact_email, e.contact_phone,
                       e.status, e.created_at, e.last_message_at
                FROM enquiries e
                JOIN enquiry_participants p ON p.enquiry_id = e.id
                WHERE p.user_id = $1
                ORDER BY e.last_message_at DESC
                "#,
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
        };

        let ids: Vec<Uuid> = rows
            .iter()
            .map(|row| row.try_get("id"))
            .collect::<std::result::Result<_, _>>()?;
        let mut participants_by_enquiry = self.load_participants(&ids).await?;

        let mut enquiries = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.try_get("id")?;
            let (participants, unread_counts) =
                participants_by_enquiry.remove(&id).unwrap_or_default();
            enquiries.push(enquiry_from_row(row, participants, unread_counts)?);
        }

        Ok(enquiries)
    }

    /// Messages in conversation order, each with its acknowledgement set.
    pub async fn get_messages(
        &self,
        enquiry_id: Uuid,
        user_id: Uuid,
        staff: bool,
    ) -> Result<Vec<MessageResponse>> {
        self.require_enquiry(enquiry_id).await?;

        if !staff && !self.is_participant(enquiry_id, user_id).await? {
            return Err(AppError::Forbidden("You are not part of this enquiry".to_string()));
        }

        let rows = query(
            r#"
            SELECT m.id, m.enquiry_id, m.sender_id, m.body, m.created_at,
                   COALESCE(
                       ARRAY_AGG(r.user_id) FILTER (WHERE r.user_id IS NOT NULL),
                       ARRAY[]::uuid[]
                   ) AS read_by
            FROM messages m
            LEFT JOIN message_reads r ON r.message_id = m.id
            WHERE m.enquiry_id = $1
            GROUP BY m.id
            ORDER BY m.created_at ASC
            "#,
        )
        .bind(enquiry_id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(MessageResponse {
                id: row.try_get("id")?,
                enquiry_id: row.try_get("enquiry_id")?,
                sender_id: row.try_get("sender_id")?,
                body: row.try_get("body")?,
                created_at: row.try_get("created_at")?,
                read_by: row.try_get("read_by")?,
            });
        }

        Ok(messages)
    }

    /// Sum of unread counters across every thread the user participates in.
    pub async fn unread_total(&self, user_id: Uuid) -> Result<i64> {
        let row = query(
            "SELECT COALESCE(SUM(unread_count), 0) as total
             FROM enquiry_participants WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("total")?)
    }

    pub async fn update_status(&self, enquiry_id: Uuid, status: EnquiryStatus) -> Result<Enquiry> {
        let result = query("UPDATE enquiries SET status = $2 WHERE id = $1")
            .bind(enquiry_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Enquiry not found".to_string()));
        }

        self.find_by_id(enquiry_id)
            .await?
            .ok_or(AppError::NotFound("Enquiry not found".to_string()))
    }

    async fn require_enquiry(&self, enquiry_id: Uuid) -> Result<()> {
        let row = query("SELECT EXISTS(SELECT 1 FROM enquiries WHERE id = $1) as exists")
            .bind(enquiry_id)
            .fetch_one(&self.pool)
            .await?;

        if row.try_get::<bool, _>("exists").unwrap_or(false) {
            Ok(())
        } else {
            Err(AppError::NotFound("Enquiry not found".to_string()))
        }
    }

    async fn load_participants(
        &self,
        enquiry_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, (Vec<Uuid>, HashMap<Uuid, i32>)>> {
        if enquiry_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = query(
            "SELECT enquiry_id, user_id, unread_count
             FROM enquiry_participants
             WHERE enquiry_id = ANY($1)
             ORDER BY joined_at ASC",
        )
        .bind(enquiry_ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        let mut by_enquiry: HashMap<Uuid, (Vec<Uuid>, HashMap<Uuid, i32>)> = HashMap::new();
        for row in rows {
            let enquiry_id: Uuid = row.try_get("enquiry_id")?;
            let user_id: Uuid = row.try_get("user_id")?;
            let unread_count: i32 = row.try_get("unread_count")?;

            let entry = by_enquiry.entry(enquiry_id).or_default();
            entry.0.push(user_id);
            entry.1.insert(user_id, unread_count);
        }

        Ok(by_enquiry)
    }
}

fn enquiry_from_row(
    row: &PgRow,
    participants: Vec<Uuid>,
    unread_counts: HashMap<Uuid, i32>,
) -> Result<Enquiry> {
    let status: String = row.try_get("status")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let last_message_at: DateTime<Utc> = row.try_get("last_message_at")?;

    Ok(Enquiry {
        id: row.try_get("id")?,
        property_id: row.try_get("property_id")?,
        contact_name: row.try_get("contact_name")?,
        contact_email: row.try_get("contact_email")?,
        contact_phone: row.try_get("contact_phone")?,
        status: status.parse().unwrap_or(EnquiryStatus::New),
        participants,
        unread_counts,
        created_at,
        last_message_at,
    })
}
