use crate::models::{
    ConversationListRow, ConversationRow, ErrandRow, MessageRow, ReportRow, TransactionRow,
    UserRow,
};
use crate::sql::{self, OptionalExt};
use crate::Database;
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    // -- Profiles --

    pub fn ensure_profile(&self, user_id: &str, display_name: &str) -> Result<()> {
        self.with_conn(|conn| sql::ensure_profile(conn, user_id, display_name))
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Option<(String, Option<String>)>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT display_name, avatar_url FROM profiles WHERE user_id = ?1",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })
    }

    pub fn update_display_name(&self, user_id: &str, display_name: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE profiles
                 SET display_name = ?2, updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE user_id = ?1",
                (user_id, display_name),
            )?;
            Ok(rows)
        })
    }

    pub fn update_avatar_url(&self, user_id: &str, avatar_url: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE profiles
                 SET avatar_url = ?2, updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE user_id = ?1",
                (user_id, avatar_url),
            )?;
            Ok(rows)
        })
    }

    // -- Errands --

    pub fn insert_errand(
        &self,
        id: &str,
        user_id: &str,
        title: &str,
        description: &str,
        category: &str,
        location: &str,
        budget: f64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO errands (id, user_id, title, description, category, location, budget)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                (id, user_id, title, description, category, location, budget),
            )?;
            Ok(())
        })
    }

    pub fn get_errand(&self, id: &str) -> Result<Option<ErrandRow>> {
        self.with_conn(|conn| sql::get_errand(conn, id))
    }

    /// List errands newest first, optionally filtered by status and by a
    /// case-insensitive substring match on title/description/category.
    pub fn list_errands(
        &self,
        status: Option<&str>,
        search: Option<&str>,
    ) -> Result<Vec<ErrandRow>> {
        self.with_conn(|conn| query_errands(conn, status, search))
    }

    // -- Conversations --

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, errand_id, poster_id, helper_id, created_at, updated_at
                 FROM conversations WHERE id = ?1",
            )?;
            stmt.query_row([id], |row| {
                Ok(ConversationRow {
                    id: row.get(0)?,
                    errand_id: row.get(1)?,
                    poster_id: row.get(2)?,
                    helper_id: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            })
            .optional()
        })
    }

    /// One enriched row for the chat header.
    pub fn get_conversation_enriched(&self, id: &str) -> Result<Option<ConversationListRow>> {
        self.with_conn(|conn| {
            let mut rows = query_conversation_list(conn, "c.id = ?1", [id])?;
            Ok(if rows.is_empty() {
                None
            } else {
                Some(rows.swap_remove(0))
            })
        })
    }

    /// All conversations the user participates in, most recently active first.
    pub fn list_conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationListRow>> {
        self.with_conn(|conn| {
            query_conversation_list(conn, "c.poster_id = ?1 OR c.helper_id = ?1", [user_id])
        })
    }

    /// Of the given conversation ids, the ones where the user is a
    /// participant. Unknown ids and other people's conversations are
    /// silently dropped.
    pub fn conversations_for_participant(
        &self,
        user_id: &str,
        ids: &[String],
    ) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM conversations
                 WHERE id = ?1 AND (poster_id = ?2 OR helper_id = ?2)",
            )?;
            let mut allowed = Vec::new();
            for id in ids {
                if let Some(found) = stmt
                    .query_row((id, user_id), |row| row.get::<_, String>(0))
                    .optional()?
                {
                    allowed.push(found);
                }
            }
            Ok(allowed)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<()> {
        self.with_conn(|conn| sql::insert_message(conn, id, conversation_id, sender_id, content))
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| sql::get_message(conn, id))
    }

    /// Full history of one conversation, ascending by creation time with
    /// insertion order (rowid) as the tiebreak for same-instant writes.
    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, conversation_id))
    }

    // -- Transactions --

    pub fn list_transactions_for_user(&self, user_id: &str) -> Result<Vec<TransactionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, errand_id, type, amount, description, created_at
                 FROM transactions
                 WHERE user_id = ?1
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(TransactionRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        errand_id: row.get(2)?,
                        kind: row.get(3)?,
                        amount: row.get(4)?,
                        description: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn transactions_for_errand(&self, errand_id: &str) -> Result<Vec<TransactionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, errand_id, type, amount, description, created_at
                 FROM transactions WHERE errand_id = ?1",
            )?;
            let rows = stmt
                .query_map([errand_id], |row| {
                    Ok(TransactionRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        errand_id: row.get(2)?,
                        kind: row.get(3)?,
                        amount: row.get(4)?,
                        description: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Reports --

    pub fn insert_report(
        &self,
        id: &str,
        conversation_id: &str,
        errand_id: &str,
        reporter_id: &str,
        reported_user_id: &str,
        reason: &str,
        description: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reports
                     (id, conversation_id, errand_id, reporter_id, reported_user_id, reason, description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                (
                    id,
                    conversation_id,
                    errand_id,
                    reporter_id,
                    reported_user_id,
                    reason,
                    description,
                ),
            )?;
            Ok(())
        })
    }

    pub fn get_report(&self, id: &str) -> Result<Option<ReportRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, errand_id, reporter_id, reported_user_id,
                        reason, description, status, created_at
                 FROM reports WHERE id = ?1",
            )?;
            stmt.query_row([id], |row| {
                Ok(ReportRow {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    errand_id: row.get(2)?,
                    reporter_id: row.get(3)?,
                    reported_user_id: row.get(4)?,
                    reason: row.get(5)?,
                    description: row.get(6)?,
                    status: row.get(7)?,
                    created_at: row.get(8)?,
                })
            })
            .optional()
        })
    }

    // -- Stats --

    /// Home-page counters: posted / active / completed errands and
    /// conversation count for one user.
    pub fn stats_for_user(&self, user_id: &str) -> Result<(u64, u64, u64, u64)> {
        self.with_conn(|conn| {
            let posted: u64 = conn.query_row(
                "SELECT COUNT(*) FROM errands WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            let active: u64 = conn.query_row(
                "SELECT COUNT(*) FROM errands WHERE user_id = ?1 AND status = 'in_progress'",
                [user_id],
                |row| row.get(0),
            )?;
            let completed: u64 = conn.query_row(
                "SELECT COUNT(*) FROM errands WHERE user_id = ?1 AND status = 'completed'",
                [user_id],
                |row| row.get(0),
            )?;
            let conversations: u64 = conn.query_row(
                "SELECT COUNT(*) FROM conversations WHERE poster_id = ?1 OR helper_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            Ok((posted, active, completed, conversations))
        })
    }
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, password, created_at FROM users WHERE username = ?1")?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_errands(
    conn: &Connection,
    status: Option<&str>,
    search: Option<&str>,
) -> Result<Vec<ErrandRow>> {
    let mut sql = String::from(
        "SELECT e.id, e.user_id, p.display_name, e.title, e.description, e.category,
                e.location, e.budget, e.status, e.accepted_by, e.created_at, e.updated_at
         FROM errands e
         LEFT JOIN profiles p ON p.user_id = e.user_id
         WHERE 1=1",
    );
    let mut params: Vec<String> = Vec::new();

    if let Some(status) = status {
        params.push(status.to_string());
        sql.push_str(&format!(" AND e.status = ?{}", params.len()));
    }
    if let Some(search) = search {
        params.push(format!("%{}%", search.to_lowercase()));
        let n = params.len();
        sql.push_str(&format!(
            " AND (lower(e.title) LIKE ?{n} OR lower(e.description) LIKE ?{n} OR lower(e.category) LIKE ?{n})"
        ));
    }
    sql.push_str(" ORDER BY e.created_at DESC");

    let mut stmt = conn.prepare(&sql)?;
    let bound: Vec<&dyn rusqlite::types::ToSql> = params
        .iter()
        .map(|p| p as &dyn rusqlite::types::ToSql)
        .collect();

    let rows = stmt
        .query_map(bound.as_slice(), |row| {
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
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_messages(conn: &Connection, conversation_id: &str) -> Result<Vec<MessageRow>> {
    // JOIN profiles to fetch sender_name in a single query (eliminates N+1)
    let mut stmt = conn.prepare(
        "SELECT m.id, m.conversation_id, m.sender_id, p.display_name, m.content, m.created_at
         FROM messages m
         LEFT JOIN profiles p ON p.user_id = m.sender_id
         WHERE m.conversation_id = ?1
         ORDER BY m.created_at ASC, m.rowid ASC",
    )?;

    let rows = stmt
        .query_map([conversation_id], |row| {
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
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_conversation_list<P: rusqlite::Params>(
    conn: &Connection,
    predicate: &str,
    params: P,
) -> Result<Vec<ConversationListRow>> {
    let sql = format!(
        "SELECT c.id, c.errand_id, e.title,
                c.poster_id, pp.display_name, pp.avatar_url,
                c.helper_id, hp.display_name, hp.avatar_url,
                (SELECT content FROM messages m WHERE m.conversation_id = c.id
                 ORDER BY m.created_at DESC, m.rowid DESC LIMIT 1),
                (SELECT created_at FROM messages m WHERE m.conversation_id = c.id
                 ORDER BY m.created_at DESC, m.rowid DESC LIMIT 1),
                c.created_at, c.updated_at
         FROM conversations c
         JOIN errands e ON e.id = c.errand_id
         LEFT JOIN profiles pp ON pp.user_id = c.poster_id
         LEFT JOIN profiles hp ON hp.user_id = c.helper_id
         WHERE {predicate}
         ORDER BY c.updated_at DESC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok(ConversationListRow {
                id: row.get(0)?,
                errand_id: row.get(1)?,
                errand_title: row.get(2)?,
                poster_id: row.get(3)?,
                poster_name: row
                    .get::<_, Option<String>>(4)?
                    .unwrap_or_else(|| "Anonymous".to_string()),
                poster_avatar: row.get(5)?,
                helper_id: row.get(6)?,
                helper_name: row
                    .get::<_, Option<String>>(7)?
                    .unwrap_or_else(|| "Anonymous".to_string()),
                helper_avatar: row.get(8)?,
                last_message: row.get(9)?,
                last_message_at: row.get(10)?,
                created_at: row.get(11)?,
                updated_at: row.get(12)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, name: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, name, "hash").unwrap();
        db.ensure_profile(&id, name).unwrap();
        id
    }

    fn add_errand(db: &Database, poster: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.insert_errand(
            &id,
            poster,
            "Pick up documents",
            "Transcript from the registrar",
            "Documents",
            "Main Building",
            100.0,
        )
        .unwrap();
        id
    }

    #[test]
    fn ensure_profile_is_idempotent() {
        let db = test_db();
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, "maria", "hash").unwrap();

        db.ensure_profile(&id, "maria").unwrap();
        db.ensure_profile(&id, "someone else").unwrap();

        let (name, avatar) = db.get_profile(&id).unwrap().unwrap();
        assert_eq!(name, "maria");
        assert!(avatar.is_none());
    }

    #[test]
    fn budget_must_be_positive() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let result = db.insert_errand(
            &Uuid::new_v4().to_string(),
            &poster,
            "t",
            "d",
            "c",
            "l",
            0.0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn conversation_unique_per_errand_and_helper() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let helper = add_user(&db, "juan");
        let errand = add_errand(&db, &poster);

        db.with_conn(|conn| {
            sql::insert_conversation(conn, &Uuid::new_v4().to_string(), &errand, &poster, &helper)
        })
        .unwrap();

        // Second insert for the same (errand, helper) pair must be rejected
        // by the storage-level constraint, not just an application check.
        let dup = db.with_conn(|conn| {
            sql::insert_conversation(conn, &Uuid::new_v4().to_string(), &errand, &poster, &helper)
        });
        assert!(dup.is_err());
    }

    #[test]
    fn messages_come_back_in_creation_order() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let helper = add_user(&db, "juan");
        let errand = add_errand(&db, &poster);
        let conv = Uuid::new_v4().to_string();
        db.with_conn(|conn| sql::insert_conversation(conn, &conv, &errand, &poster, &helper))
            .unwrap();

        // Interleave senders; insertion order must survive the round trip.
        let expected: Vec<String> = (0..6).map(|i| format!("msg-{}", i)).collect();
        for (i, content) in expected.iter().enumerate() {
            let sender = if i % 2 == 0 { &helper } else { &poster };
            db.insert_message(&Uuid::new_v4().to_string(), &conv, sender, content)
                .unwrap();
        }

        let rows = db.get_messages(&conv).unwrap();
        let contents: Vec<String> = rows.iter().map(|r| r.content.clone()).collect();
        assert_eq!(contents, expected);

        let mut last = String::new();
        for row in &rows {
            assert!(row.created_at >= last);
            last = row.created_at.clone();
        }
    }

    #[test]
    fn claim_errand_is_conditional_on_available() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let helper_a = add_user(&db, "juan");
        let helper_b = add_user(&db, "ana");
        let errand = add_errand(&db, &poster);

        let first = db
            .with_conn(|conn| sql::claim_errand(conn, &errand, &helper_a))
            .unwrap();
        assert_eq!(first, 1);

        // Second claim sees a non-available errand and affects zero rows.
        let second = db
            .with_conn(|conn| sql::claim_errand(conn, &errand, &helper_b))
            .unwrap();
        assert_eq!(second, 0);

        let row = db.get_errand(&errand).unwrap().unwrap();
        assert_eq!(row.status, "in_progress");
        assert_eq!(row.accepted_by.as_deref(), Some(helper_a.as_str()));
    }

    #[test]
    fn errand_search_is_case_insensitive() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        add_errand(&db, &poster);

        let hits = db.list_errands(Some("available"), Some("REGISTRAR")).unwrap();
        assert_eq!(hits.len(), 1);

        let misses = db.list_errands(Some("available"), Some("laundry")).unwrap();
        assert!(misses.is_empty());
    }

    #[test]
    fn participant_filter_drops_foreign_conversations() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let helper = add_user(&db, "juan");
        let stranger = add_user(&db, "ana");
        let errand = add_errand(&db, &poster);
        let conv = Uuid::new_v4().to_string();
        db.with_conn(|conn| sql::insert_conversation(conn, &conv, &errand, &poster, &helper))
            .unwrap();

        let requested = vec![conv.clone(), Uuid::new_v4().to_string()];
        assert_eq!(
            db.conversations_for_participant(&poster, &requested).unwrap(),
            vec![conv.clone()]
        );
        assert_eq!(
            db.conversations_for_participant(&helper, &requested).unwrap(),
            vec![conv]
        );
        assert!(
            db.conversations_for_participant(&stranger, &requested)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn conversation_list_carries_last_message_preview() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let helper = add_user(&db, "juan");
        let errand = add_errand(&db, &poster);
        let conv = Uuid::new_v4().to_string();
        db.with_conn(|conn| sql::insert_conversation(conn, &conv, &errand, &poster, &helper))
            .unwrap();
        db.insert_message(&Uuid::new_v4().to_string(), &conv, &helper, "first")
            .unwrap();
        db.insert_message(&Uuid::new_v4().to_string(), &conv, &poster, "second")
            .unwrap();

        let list = db.list_conversations_for_user(&helper).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].errand_title, "Pick up documents");
        assert_eq!(list[0].last_message.as_deref(), Some("second"));
        assert_eq!(list[0].poster_name, "maria");
        assert_eq!(list[0].helper_name, "juan");
    }
}
