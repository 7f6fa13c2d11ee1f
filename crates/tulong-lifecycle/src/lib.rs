//! The errand lifecycle manager.
//!
//! An errand moves `available` -> `in_progress` -> `completed` or
//! `cancelled`; terminal states accept nothing. Every transition here runs
//! as one SQLite transaction whose status flip is a conditional update
//! (`WHERE status = <expected>`), so a stale read can never commit a lost
//! update: the loser of a race gets [`LifecycleError::WrongStatus`] and no
//! side effects.

use anyhow::anyhow;
use rusqlite::Connection;
use uuid::Uuid;

use tulong_db::models::MessageRow;
use tulong_db::sql;
use tulong_db::Database;
use tulong_types::models::ErrandStatus;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("errand not found")]
    NotFound,

    #[error("you cannot accept your own errand")]
    OwnErrand,

    #[error("only the assigned helper can do that")]
    NotHelper,

    #[error("only the poster or the assigned helper can do that")]
    Forbidden,

    /// The errand was not in the state the transition requires. Also raised
    /// when the conditional update affects zero rows because another actor
    /// transitioned the errand first.
    #[error("errand is {actual}, expected {expected}")]
    WrongStatus {
        expected: &'static str,
        actual: String,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl LifecycleError {
    /// Precondition violations abort before any write; storage failures may
    /// have rolled a partially applied transition back.
    pub fn is_precondition(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

/// Outcome of a successful Accept.
#[derive(Debug)]
pub struct AcceptOutcome {
    pub conversation_id: Uuid,
    /// The introductory message, present only when the conversation was
    /// newly created. The caller broadcasts it to subscribed chat views.
    pub intro_message: Option<MessageRow>,
}

/// Transitions an actor may trigger on an errand, given its status and the
/// actor's relationship to it. Drives which controls a client renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Accept,
    MarkInProgress,
    Complete,
    Cancel,
}

/// The visibility rule: nothing on terminal errands, nothing for bystanders
/// (except accepting an open errand), and per-state controls for the owner
/// and the assigned helper.
pub fn available_actions(status: ErrandStatus, is_owner: bool, is_helper: bool) -> Vec<Action> {
    if status.is_terminal() {
        return Vec::new();
    }

    let mut actions = Vec::new();
    match status {
        ErrandStatus::Available => {
            if !is_owner && !is_helper {
                actions.push(Action::Accept);
            }
            if is_helper {
                actions.push(Action::MarkInProgress);
            }
            if is_owner {
                actions.push(Action::Cancel);
            }
        }
        ErrandStatus::InProgress => {
            if is_owner || is_helper {
                actions.push(Action::Complete);
                actions.push(Action::Cancel);
            }
        }
        ErrandStatus::Completed | ErrandStatus::Cancelled => {}
    }
    actions
}

/// Accept an errand: claim it for the helper, open the conversation with the
/// poster, and post the introductory message, all in one transaction.
///
/// Idempotent per (errand, helper): a repeat call finds the existing
/// conversation and returns its id without touching anything.
pub fn accept(
    db: &Database,
    errand_id: Uuid,
    actor: Uuid,
    actor_name: &str,
) -> Result<AcceptOutcome, LifecycleError> {
    let eid = errand_id.to_string();
    let uid = actor.to_string();

    in_transaction(db, |tx| {
        let errand = sql::get_errand(tx, &eid)?.ok_or(LifecycleError::NotFound)?;
        if errand.user_id == uid {
            return Err(LifecycleError::OwnErrand);
        }

        // Idempotent re-accept: hand back the existing conversation.
        if let Some(existing) = sql::find_conversation(tx, &eid, &uid)? {
            let conversation_id = parse_uuid(&existing)?;
            return Ok(AcceptOutcome {
                conversation_id,
                intro_message: None,
            });
        }

        sql::ensure_profile(tx, &uid, actor_name)?;

        if sql::claim_errand(tx, &eid, &uid)? == 0 {
            return Err(LifecycleError::WrongStatus {
                expected: "available",
                actual: errand.status,
            });
        }

        let conversation_id = Uuid::new_v4();
        sql::insert_conversation(tx, &conversation_id.to_string(), &eid, &errand.user_id, &uid)?;

        let message_id = Uuid::new_v4().to_string();
        let content = format!("Hello! I'm {}. I'd like to help with this errand.", actor_name);
        sql::insert_message(tx, &message_id, &conversation_id.to_string(), &uid, &content)?;

        let intro = sql::get_message(tx, &message_id)?
            .ok_or_else(|| anyhow!("intro message vanished within transaction"))?;

        tracing::info!(
            "{} accepted errand {} (conversation {})",
            actor_name,
            errand_id,
            conversation_id
        );

        Ok(AcceptOutcome {
            conversation_id,
            intro_message: Some(intro),
        })
    })
}

/// Explicitly move an errand the actor is already assigned to into
/// `in_progress`. Distinct from Accept: no conversation is involved.
pub fn mark_in_progress(
    db: &Database,
    errand_id: Uuid,
    actor: Uuid,
) -> Result<(), LifecycleError> {
    let eid = errand_id.to_string();
    let uid = actor.to_string();

    in_transaction(db, |tx| {
        let errand = sql::get_errand(tx, &eid)?.ok_or(LifecycleError::NotFound)?;
        if errand.accepted_by.as_deref() != Some(uid.as_str()) {
            return Err(LifecycleError::NotHelper);
        }
        if sql::set_errand_status(tx, &eid, "available", "in_progress")? == 0 {
            return Err(LifecycleError::WrongStatus {
                expected: "available",
                actual: errand.status,
            });
        }
        Ok(())
    })
}

/// Complete an `in_progress` errand. The payment record crediting the helper
/// is inserted before the status flip; both commit together, so a
/// `completed` errand without its payment can never be observed, and the
/// guard makes re-completion (and thus a duplicate payment) impossible.
pub fn complete(db: &Database, errand_id: Uuid, actor: Uuid) -> Result<(), LifecycleError> {
    let eid = errand_id.to_string();
    let uid = actor.to_string();

    in_transaction(db, |tx| {
        let errand = sql::get_errand(tx, &eid)?.ok_or(LifecycleError::NotFound)?;
        let is_owner = errand.user_id == uid;
        let is_helper = errand.accepted_by.as_deref() == Some(uid.as_str());
        if !is_owner && !is_helper {
            return Err(LifecycleError::Forbidden);
        }
        if errand.status != "in_progress" {
            return Err(LifecycleError::WrongStatus {
                expected: "in_progress",
                actual: errand.status,
            });
        }

        if let Some(helper_id) = &errand.accepted_by {
            sql::insert_transaction(
                tx,
                &Uuid::new_v4().to_string(),
                helper_id,
                &eid,
                "earning",
                errand.budget,
                "Errand completed - earned payment",
            )?;
        }

        if sql::set_errand_status(tx, &eid, "in_progress", "completed")? == 0 {
            // Lost the flip after the guard's read; roll the payment back too.
            return Err(LifecycleError::WrongStatus {
                expected: "in_progress",
                actual: errand.status,
            });
        }

        tracing::info!("errand {} completed, helper credited {}", errand_id, errand.budget);
        Ok(())
    })
}

/// Cancel an errand. The poster may cancel while it is still `available`;
/// once `in_progress`, either the poster or the helper may cancel. Never
/// creates a payment record.
pub fn cancel(db: &Database, errand_id: Uuid, actor: Uuid) -> Result<(), LifecycleError> {
    let eid = errand_id.to_string();
    let uid = actor.to_string();

    in_transaction(db, |tx| {
        let errand = sql::get_errand(tx, &eid)?.ok_or(LifecycleError::NotFound)?;
        let is_owner = errand.user_id == uid;
        let is_helper = errand.accepted_by.as_deref() == Some(uid.as_str());

        let expected: &'static str = match errand.status.as_str() {
            "available" => {
                if !is_owner {
                    return Err(LifecycleError::Forbidden);
                }
                "available"
            }
            "in_progress" => {
                if !is_owner && !is_helper {
                    return Err(LifecycleError::Forbidden);
                }
                "in_progress"
            }
            _ => {
                return Err(LifecycleError::WrongStatus {
                    expected: "available or in_progress",
                    actual: errand.status.clone(),
                });
            }
        };

        if sql::set_errand_status(tx, &eid, expected, "cancelled")? == 0 {
            return Err(LifecycleError::WrongStatus {
                expected,
                actual: errand.status,
            });
        }
        Ok(())
    })
}

/// Run `f` inside a rusqlite transaction: commit on success, roll back on
/// any error so a failed transition leaves no partial effects.
fn in_transaction<T>(
    db: &Database,
    f: impl FnOnce(&Connection) -> Result<T, LifecycleError>,
) -> Result<T, LifecycleError> {
    db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        let outcome = f(&tx);
        match &outcome {
            Ok(_) => tx.commit()?,
            Err(_) => tx.rollback()?,
        }
        Ok(outcome)
    })
    .map_err(LifecycleError::Storage)?
}

fn parse_uuid(raw: &str) -> Result<Uuid, LifecycleError> {
    raw.parse::<Uuid>()
        .map_err(|e| LifecycleError::Storage(anyhow!("corrupt id '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), name, "hash").unwrap();
        db.ensure_profile(&id.to_string(), name).unwrap();
        id
    }

    fn add_errand(db: &Database, poster: Uuid, budget: f64) -> Uuid {
        let id = Uuid::new_v4();
        db.insert_errand(
            &id.to_string(),
            &poster.to_string(),
            "Buy a textbook",
            "From the university bookstore",
            "Shopping",
            "Bookstore",
            budget,
        )
        .unwrap();
        id
    }

    #[test]
    fn accept_claims_errand_and_opens_conversation() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let helper = add_user(&db, "juan");
        let errand = add_errand(&db, poster, 100.0);

        let outcome = accept(&db, errand, helper, "juan").unwrap();
        let intro = outcome.intro_message.expect("new conversation has an intro");
        assert_eq!(intro.conversation_id, outcome.conversation_id.to_string());
        assert_eq!(intro.sender_id, helper.to_string());
        assert!(intro.content.starts_with("Hello! I'm juan"));

        let row = db.get_errand(&errand.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "in_progress");
        assert_eq!(row.accepted_by, Some(helper.to_string()));
    }

    #[test]
    fn accept_is_idempotent_per_errand_and_helper() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let helper = add_user(&db, "juan");
        let errand = add_errand(&db, poster, 100.0);

        let first = accept(&db, errand, helper, "juan").unwrap();
        let second = accept(&db, errand, helper, "juan").unwrap();

        assert_eq!(first.conversation_id, second.conversation_id);
        assert!(second.intro_message.is_none());

        // Still exactly one intro message.
        let messages = db.get_messages(&first.conversation_id.to_string()).unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn accept_own_errand_is_rejected() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let errand = add_errand(&db, poster, 50.0);

        let err = accept(&db, errand, poster, "maria").unwrap_err();
        assert!(matches!(err, LifecycleError::OwnErrand));
        assert!(err.is_precondition());
    }

    #[test]
    fn accept_missing_errand_is_rejected() {
        let db = test_db();
        let helper = add_user(&db, "juan");
        let err = accept(&db, Uuid::new_v4(), helper, "juan").unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound));
    }

    #[test]
    fn second_helper_loses_the_race() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let first = add_user(&db, "juan");
        let second = add_user(&db, "ana");
        let errand = add_errand(&db, poster, 80.0);

        accept(&db, errand, first, "juan").unwrap();

        let err = accept(&db, errand, second, "ana").unwrap_err();
        assert!(
            matches!(err, LifecycleError::WrongStatus { expected: "available", .. }),
            "stale availability must surface as a precondition failure"
        );

        // Exactly one conversation against the errand.
        let (for_first, for_second) = (
            db.list_conversations_for_user(&first.to_string()).unwrap(),
            db.list_conversations_for_user(&second.to_string()).unwrap(),
        );
        assert_eq!(for_first.len(), 1);
        assert!(for_second.is_empty());
    }

    #[test]
    fn failed_accept_leaves_nothing_behind() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let helper = add_user(&db, "juan");
        let errand = add_errand(&db, poster, 80.0);

        cancel(&db, errand, poster).unwrap();
        let err = accept(&db, errand, helper, "juan").unwrap_err();
        assert!(matches!(err, LifecycleError::WrongStatus { .. }));

        let row = db.get_errand(&errand.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "cancelled");
        assert!(row.accepted_by.is_none());
        assert!(db.list_conversations_for_user(&helper.to_string()).unwrap().is_empty());
    }

    #[test]
    fn full_scenario_accept_complete_double_complete() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let helper = add_user(&db, "juan");
        let errand = add_errand(&db, poster, 100.0);

        let outcome = accept(&db, errand, helper, "juan").unwrap();
        assert!(outcome.intro_message.is_some());

        complete(&db, errand, poster).unwrap();

        let row = db.get_errand(&errand.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "completed");
        assert_eq!(row.accepted_by, Some(helper.to_string()));

        let payments = db.transactions_for_errand(&errand.to_string()).unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].user_id, helper.to_string());
        assert_eq!(payments[0].amount, 100.0);
        assert_eq!(payments[0].kind, "earning");

        // Re-completion is rejected and creates no second payment.
        let err = complete(&db, errand, poster).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::WrongStatus { expected: "in_progress", .. }
        ));
        assert_eq!(db.transactions_for_errand(&errand.to_string()).unwrap().len(), 1);
    }

    #[test]
    fn helper_may_complete() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let helper = add_user(&db, "juan");
        let errand = add_errand(&db, poster, 60.0);

        accept(&db, errand, helper, "juan").unwrap();
        complete(&db, errand, helper).unwrap();

        let row = db.get_errand(&errand.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "completed");
    }

    #[test]
    fn bystander_may_not_complete() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let helper = add_user(&db, "juan");
        let stranger = add_user(&db, "ana");
        let errand = add_errand(&db, poster, 60.0);

        accept(&db, errand, helper, "juan").unwrap();
        let err = complete(&db, errand, stranger).unwrap_err();
        assert!(matches!(err, LifecycleError::Forbidden));
    }

    #[test]
    fn complete_on_available_errand_is_rejected() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let errand = add_errand(&db, poster, 60.0);

        let err = complete(&db, errand, poster).unwrap_err();
        assert!(matches!(err, LifecycleError::WrongStatus { .. }));
        assert!(db.transactions_for_errand(&errand.to_string()).unwrap().is_empty());
    }

    #[test]
    fn cancel_rules() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let helper = add_user(&db, "juan");

        // Owner cancels while available; the helper's later accept fails.
        let open = add_errand(&db, poster, 40.0);
        cancel(&db, open, poster).unwrap();
        let row = db.get_errand(&open.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "cancelled");
        assert!(matches!(
            accept(&db, open, helper, "juan").unwrap_err(),
            LifecycleError::WrongStatus { .. }
        ));

        // Only the owner may cancel an available errand.
        let open2 = add_errand(&db, poster, 40.0);
        assert!(matches!(
            cancel(&db, open2, helper).unwrap_err(),
            LifecycleError::Forbidden
        ));

        // Once in progress, the helper may cancel too.
        accept(&db, open2, helper, "juan").unwrap();
        cancel(&db, open2, helper).unwrap();
        let row = db.get_errand(&open2.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "cancelled");

        // Terminal errands reject cancel and never gain a payment.
        assert!(matches!(
            cancel(&db, open2, poster).unwrap_err(),
            LifecycleError::WrongStatus { .. }
        ));
        assert!(db.transactions_for_errand(&open2.to_string()).unwrap().is_empty());
    }

    #[test]
    fn accepted_by_tracks_status() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let helper = add_user(&db, "juan");
        let errand = add_errand(&db, poster, 70.0);

        // available => unset
        let row = db.get_errand(&errand.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "available");
        assert!(row.accepted_by.is_none());

        // in_progress and completed => set
        accept(&db, errand, helper, "juan").unwrap();
        let row = db.get_errand(&errand.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "in_progress");
        assert!(row.accepted_by.is_some());

        complete(&db, errand, poster).unwrap();
        let row = db.get_errand(&errand.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "completed");
        assert!(row.accepted_by.is_some());
    }

    #[test]
    fn mark_in_progress_requires_assignment() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let helper = add_user(&db, "juan");
        let errand = add_errand(&db, poster, 70.0);

        assert!(matches!(
            mark_in_progress(&db, errand, helper).unwrap_err(),
            LifecycleError::NotHelper
        ));

        // Assign the helper while the errand is still available (the one
        // arrangement the explicit transition exists for), then flip it.
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE errands SET accepted_by = ?2 WHERE id = ?1",
                (errand.to_string(), helper.to_string()),
            )?;
            Ok(())
        })
        .unwrap();

        mark_in_progress(&db, errand, helper).unwrap();
        let row = db.get_errand(&errand.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "in_progress");

        // Not re-runnable: the errand left `available`.
        assert!(matches!(
            mark_in_progress(&db, errand, helper).unwrap_err(),
            LifecycleError::WrongStatus { .. }
        ));
    }

    #[test]
    fn lost_status_flip_rolls_the_payment_back() {
        let db = test_db();
        let poster = add_user(&db, "maria");
        let helper = add_user(&db, "juan");
        let errand = add_errand(&db, poster, 90.0);
        accept(&db, errand, helper, "juan").unwrap();

        // Drive the complete sequence by hand with a flip that cannot match,
        // the way a concurrent completion would make it miss.
        let eid = errand.to_string();
        db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            sql::insert_transaction(
                &tx,
                &Uuid::new_v4().to_string(),
                &helper.to_string(),
                &eid,
                "earning",
                90.0,
                "Errand completed - earned payment",
            )?;
            let rows = sql::set_errand_status(&tx, &eid, "available", "completed")?;
            assert_eq!(rows, 0);
            tx.rollback()?;
            Ok(())
        })
        .unwrap();

        assert!(db.transactions_for_errand(&eid).unwrap().is_empty());
        let row = db.get_errand(&eid).unwrap().unwrap();
        assert_eq!(row.status, "in_progress");
    }

    #[test]
    fn action_visibility_matrix() {
        use ErrandStatus::*;

        // Terminal states expose nothing to anyone.
        for status in [Completed, Cancelled] {
            assert!(available_actions(status, true, false).is_empty());
            assert!(available_actions(status, false, true).is_empty());
            assert!(available_actions(status, false, false).is_empty());
        }

        // Bystanders see only Accept, and only while available.
        assert_eq!(available_actions(Available, false, false), vec![Action::Accept]);
        assert!(available_actions(InProgress, false, false).is_empty());

        // Owner of an available errand can cancel it.
        assert_eq!(available_actions(Available, true, false), vec![Action::Cancel]);

        // Assigned helper of an available errand can start it.
        assert_eq!(
            available_actions(Available, false, true),
            vec![Action::MarkInProgress]
        );

        // In progress: both sides can complete or cancel.
        for (owner, helper) in [(true, false), (false, true)] {
            assert_eq!(
                available_actions(InProgress, owner, helper),
                vec![Action::Complete, Action::Cancel]
            );
        }
    }
}
