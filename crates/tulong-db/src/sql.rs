//! Connection-level statements shared between the query layer and the
//! lifecycle transitions. Everything here takes a plain `&Connection`, so
//! callers can run several statements inside one rusqlite transaction
//! (`Transaction` derefs to `Connection`).

use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

use crate::models::{ErrandRow, MessageRow};

/// Extension trait for optional query results
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Lazily create a profile row. A no-op when the user already has one, so
/// every write-triggering action (posting, accepting) can call it first.
pub fn ensure_profile(conn: &Connection, user_id: &str, display_name: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO profiles (id, user_id, display_name) VALUES (?1, ?2, ?3)",
        (Uuid::new_v4().to_string(), user_id, display_name),
    )?;
    Ok(())
}

pub fn get_errand(conn: &Connection, id: &str) -> Result<Option<ErrandRow>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.user_id, p.display_name, e.title, e.description, e.category,
                e.location, e.budget, e.status, e.accepted_by, e.created_at, e.updated_at
         FROM errands e
         LEFT JOIN profiles p ON p.user_id = e.user_id
         WHERE e.id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(ErrandRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                poster_name: row
                    .get::<_, Option<String>>(2)?
                    .unwrap_or_else(|| "Anonymous".to_string()),
                title: row.get(3)?,
                description: row.get(4)?,
                category: row.get(5)?,
                location: row.get(6)?,
                budget: row.get(7)?,
                status: row.get(8)?,
                accepted_by: row.get(9)?,
                created_at: row.get(10)?,
                updated_at: row.get(11)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Claim an available errand for a helper. Status and `accepted_by` change
/// together; the `status = 'available'` predicate makes this the single
/// point where a race between two helpers is decided. Returns rows affected
/// (0 means someone else won, or the errand left `available`).
pub fn claim_errand(conn: &Connection, errand_id: &str, helper_id: &str) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE errands
         SET status = 'in_progress', accepted_by = ?2,
             updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
         WHERE id = ?1 AND status = 'available'",
        (errand_id, helper_id),
    )?;
    Ok(rows)
}

/// Conditional status flip: only applies when the current status matches
/// `expected`. Returns rows affected.
pub fn set_errand_status(
    conn: &Connection,
    errand_id: &str,
    expected: &str,
    new_status: &str,
) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE errands
         SET status = ?3, updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
         WHERE id = ?1 AND status = ?2",
        (errand_id, expected, new_status),
    )?;
    Ok(rows)
}

pub fn find_conversation(
    conn: &Connection,
    errand_id: &str,
    helper_id: &str,
) -> Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM conversations WHERE errand_id = ?1 AND helper_id = ?2",
        (errand_id, helper_id),
        |row| row.get(0),
    )
    .optional()
}

pub fn insert_conversation(
    conn: &Connection,
    id: &str,
    errand_id: &str,
    poster_id: &str,
    helper_id: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO conversations (id, errand_id, poster_id, helper_id) VALUES (?1, ?2, ?3, ?4)",
        (id, errand_id, poster_id, helper_id),
    )?;
    Ok(())
}

pub fn insert_message(
    conn: &Connection,
    id: &str,
    conversation_id: &str,
    sender_id: &str,
    content: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, content) VALUES (?1, ?2, ?3, ?4)",
        (id, conversation_id, sender_id, content),
    )?;
    // Keep the conversation list sorted by recent activity
    conn.execute(
        "UPDATE conversations
         SET updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
         WHERE id = ?1",
        [conversation_id],
    )?;
    Ok(())
}

pub fn get_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.conversation_id, m.sender_id, p.display_name, m.content, m.created_at
         FROM messages m
         LEFT JOIN profiles p ON p.user_id = m.sender_id
         WHERE m.id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                sender_id: row.get(2)?,
                sender_name: row
                    .get::<_, Option<String>>(3)?
                    .unwrap_or_else(|| "Anonymous".to_string()),
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

pub fn insert_transaction(
    conn: &Connection,
    id: &str,
    user_id: &str,
    errand_id: &str,
    kind: &str,
    amount: f64,
    description: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO transactions (id, user_id, errand_id, type, amount, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        (id, user_id, errand_id, kind, amount, description),
    )?;
    Ok(())
}
