//! End-to-end tests for the reward fulfillment workflow.
//!
//! These tests drive the public engine operations against an in-memory
//! database and verify the engine's core guarantees: no double-crediting,
//! deterministic rotation, idempotent generation, and the
//! balance-equals-fold ledger invariant.

use chrono::{DateTime, NaiveDate, Utc};
use proptest::prelude::*;

use choreboard_core::{
    AllowList, Cadence, CoreError, Database, EngineConfig, EngineError, EntryReason, Ledger,
    Manual, NewTaskDefinition, ReviewDecision, RewardEngine, Role, SubmitOptions, TaskStatus,
};

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn at(d: u32) -> DateTime<Utc> {
    date(d).and_hms_opt(12, 0, 0).unwrap().and_utc()
}

fn engine_with_policy(allow: &[&str]) -> RewardEngine {
    let db = Database::open_memory().unwrap();
    let mut engine = RewardEngine::new(
        db,
        EngineConfig::default(),
        Box::new(AllowList::new(allow.iter().copied())),
    );
    engine
        .register_account("guardian-1", "Pat", Role::Guardian, "fam-1", at(1))
        .unwrap();
    for (id, name) in [("kid-a", "A"), ("kid-b", "B"), ("kid-c", "C")] {
        engine
            .register_account(id, name, Role::Dependent, "fam-1", at(1))
            .unwrap();
    }
    engine
}

fn feed_pet_definition(engine: &mut RewardEngine) -> String {
    engine
        .define_task(
            NewTaskDefinition {
                guardian_id: "guardian-1".into(),
                name: "Feed Pet".into(),
                points: 10,
                cadence: Cadence::Daily,
                weekday: None,
                due_time: None,
                assignees: vec!["kid-a".into(), "kid-b".into(), "kid-c".into()],
                anchor_date: date(4),
                prestage: false,
            },
            at(1),
        )
        .unwrap()
        .id
}

fn assert_fold_invariant(engine: &RewardEngine, account_id: &str) {
    let balance = engine.balance_of(account_id).unwrap();
    let fold: i64 = engine
        .ledger_of(account_id)
        .unwrap()
        .iter()
        .map(|e| e.delta)
        .sum();
    assert_eq!(balance, fold, "balance must equal the ledger fold");
}

#[test]
fn feed_pet_end_to_end_scenario() {
    let mut engine = engine_with_policy(&["Feed Pet"]);
    let def_id = feed_pet_definition(&mut engine);

    let instances = engine.generate(&def_id, date(4), Some(7), at(4)).unwrap();
    let assignees: Vec<&str> = instances.iter().map(|i| i.assignee_id.as_str()).collect();
    assert_eq!(
        assignees,
        vec!["kid-a", "kid-b", "kid-c", "kid-a", "kid-b", "kid-c", "kid-a"]
    );

    let day0 = engine
        .submit(&instances[0].id, "kid-a", SubmitOptions::default(), at(4))
        .unwrap();
    assert_eq!(day0.status, TaskStatus::Approved);
    assert_eq!(engine.balance_of("kid-a").unwrap(), 10);
    assert_eq!(
        engine.streak_of("kid-a").unwrap().unwrap().current_streak,
        1
    );
    assert_fold_invariant(&engine, "kid-a");
}

#[test]
fn auto_approved_task_never_observes_pending() {
    let mut engine = engine_with_policy(&["Feed Pet"]);
    let def_id = feed_pet_definition(&mut engine);
    let instances = engine.generate(&def_id, date(4), Some(1), at(4)).unwrap();

    let submitted = engine
        .submit(&instances[0].id, "kid-a", SubmitOptions::default(), at(4))
        .unwrap();
    assert_eq!(submitted.status, TaskStatus::Approved);
    assert!(submitted.reviewer_id.is_none());

    // A review after auto-approval finds a terminal instance.
    let err = engine
        .review(&instances[0].id, "guardian-1", ReviewDecision::Approve, at(4))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Engine(EngineError::InvalidState {
            from: TaskStatus::Approved,
            ..
        })
    ));
    // And no second set of credits exists.
    assert_eq!(engine.ledger_of("kid-a").unwrap().len(), 1);
}

#[test]
fn guardian_review_approves_and_credits_exactly_once() {
    let mut engine = engine_with_policy(&[]);
    let def_id = feed_pet_definition(&mut engine);
    let instances = engine.generate(&def_id, date(4), Some(1), at(4)).unwrap();

    let submitted = engine
        .submit(&instances[0].id, "kid-a", SubmitOptions::default(), at(4))
        .unwrap();
    assert_eq!(submitted.status, TaskStatus::PendingApproval);
    assert_eq!(engine.balance_of("kid-a").unwrap(), 0);

    let approved = engine
        .review(&instances[0].id, "guardian-1", ReviewDecision::Approve, at(4))
        .unwrap();
    assert_eq!(approved.status, TaskStatus::Approved);
    assert_eq!(approved.reviewer_id.as_deref(), Some("guardian-1"));
    assert_eq!(approved.awarded_points, Some(10));
    assert_eq!(engine.balance_of("kid-a").unwrap(), 10);

    // The second review (a retried or racing request) loses with
    // InvalidState and no further ledger entries appear.
    let err = engine
        .review(&instances[0].id, "guardian-1", ReviewDecision::Approve, at(4))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Engine(EngineError::InvalidState { .. })
    ));
    assert_eq!(engine.balance_of("kid-a").unwrap(), 10);
    assert_eq!(engine.ledger_of("kid-a").unwrap().len(), 1);
    assert_fold_invariant(&engine, "kid-a");
}

#[test]
fn rejection_writes_nothing_to_the_ledger() {
    let mut engine = engine_with_policy(&[]);
    let def_id = feed_pet_definition(&mut engine);
    let instances = engine.generate(&def_id, date(4), Some(1), at(4)).unwrap();

    engine
        .submit(&instances[0].id, "kid-a", SubmitOptions::default(), at(4))
        .unwrap();
    let rejected = engine
        .review(&instances[0].id, "guardian-1", ReviewDecision::Reject, at(4))
        .unwrap();
    assert_eq!(rejected.status, TaskStatus::Rejected);
    assert!(engine.ledger_of("kid-a").unwrap().is_empty());
    assert_eq!(engine.balance_of("kid-a").unwrap(), 0);

    // Terminal: no late approval can revive it.
    assert!(engine
        .review(&instances[0].id, "guardian-1", ReviewDecision::Approve, at(5))
        .is_err());
}

#[test]
fn effort_minutes_earn_a_capped_bonus() {
    let mut engine = engine_with_policy(&[]);
    let def_id = feed_pet_definition(&mut engine);
    let instances = engine.generate(&def_id, date(4), Some(1), at(4)).unwrap();

    engine
        .submit(
            &instances[0].id,
            "kid-a",
            SubmitOptions {
                notes: Some("scrubbed the bowl too".into()),
                effort_minutes: Some(45),
            },
            at(4),
        )
        .unwrap();
    let approved = engine
        .review(&instances[0].id, "guardian-1", ReviewDecision::Approve, at(4))
        .unwrap();

    // 10 base + 10 effort (45 minutes capped at 20 -> 10 points).
    assert_eq!(approved.awarded_points, Some(20));
    let entries = engine.ledger_of("kid-a").unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|e| e.reason == EntryReason::EffortBonus && e.delta == 10));
    assert_fold_invariant(&engine, "kid-a");
}

#[test]
fn three_consecutive_days_earn_one_streak_bonus() {
    let mut engine = engine_with_policy(&["Feed Pet"]);
    let def_id = feed_pet_definition(&mut engine);
    // Single assignee so one dependent completes every day.
    engine
        .set_assignees(&def_id, vec!["kid-a".into()], 0, at(1))
        .unwrap();
    let instances = engine.generate(&def_id, date(4), Some(3), at(4)).unwrap();

    for (i, day) in (4..=6).enumerate() {
        engine
            .submit(&instances[i].id, "kid-a", SubmitOptions::default(), at(day))
            .unwrap();
    }

    let streak = engine.streak_of("kid-a").unwrap().unwrap();
    assert_eq!(streak.current_streak, 3);
    assert_eq!(streak.longest_streak, 3);

    let entries = engine.ledger_of("kid-a").unwrap();
    let streak_bonuses: Vec<_> = entries
        .iter()
        .filter(|e| e.reason == EntryReason::StreakBonus)
        .collect();
    assert_eq!(streak_bonuses.len(), 1);
    assert_eq!(streak_bonuses[0].delta, 10);
    // 3 base credits + 1 milestone bonus.
    assert_eq!(engine.balance_of("kid-a").unwrap(), 40);
    assert_fold_invariant(&engine, "kid-a");
}

#[test]
fn second_completion_on_the_same_day_does_not_stack() {
    let mut engine = engine_with_policy(&["Feed Pet", "Water Plants"]);
    let feed = feed_pet_definition(&mut engine);
    engine
        .set_assignees(&feed, vec!["kid-a".into()], 0, at(1))
        .unwrap();
    let water = engine
        .define_task(
            NewTaskDefinition {
                guardian_id: "guardian-1".into(),
                name: "Water Plants".into(),
                points: 5,
                cadence: Cadence::Daily,
                weekday: None,
                due_time: None,
                assignees: vec!["kid-a".into()],
                anchor_date: date(4),
                prestage: false,
            },
            at(1),
        )
        .unwrap()
        .id;

    let feed_instances = engine.generate(&feed, date(4), Some(2), at(4)).unwrap();
    let water_instances = engine.generate(&water, date(4), Some(2), at(4)).unwrap();

    engine
        .submit(&feed_instances[0].id, "kid-a", SubmitOptions::default(), at(4))
        .unwrap();
    engine
        .submit(&feed_instances[1].id, "kid-a", SubmitOptions::default(), at(5))
        .unwrap();
    // Second qualifying completion on day 5.
    engine
        .submit(&water_instances[1].id, "kid-a", SubmitOptions::default(), at(5))
        .unwrap();

    let streak = engine.streak_of("kid-a").unwrap().unwrap();
    assert_eq!(streak.current_streak, 2);
    assert!(engine
        .ledger_of("kid-a")
        .unwrap()
        .iter()
        .all(|e| e.reason != EntryReason::StreakBonus));
}

#[test]
fn regeneration_never_reassigns_a_date() {
    let mut engine = engine_with_policy(&[]);
    let def_id = feed_pet_definition(&mut engine);

    let first = engine.generate(&def_id, date(4), Some(7), at(4)).unwrap();
    let second = engine.generate(&def_id, date(4), Some(7), at(5)).unwrap();
    assert!(second.is_empty());

    // Changing the dependent list re-anchors future rotation but leaves
    // persisted instances alone.
    engine
        .set_assignees(&def_id, vec!["kid-b".into(), "kid-c".into()], 0, at(10))
        .unwrap();
    let later = engine.generate(&def_id, date(11), Some(2), at(10)).unwrap();
    assert_eq!(later.len(), 2);
    // Anchor moved to day 10: day 11 is offset 1 into the new list.
    assert_eq!(later[0].assignee_id, "kid-c");
    assert_eq!(later[1].assignee_id, "kid-b");

    let unchanged = engine.db().instances_for_definition(&def_id).unwrap();
    for (before, after) in first.iter().zip(unchanged.iter()) {
        assert_eq!(before.assignee_id, after.assignee_id);
        assert_eq!(before.due_date, after.due_date);
    }
}

#[test]
fn stale_version_loses_concurrent_definition_edit() {
    let mut engine = engine_with_policy(&[]);
    let def_id = feed_pet_definition(&mut engine);

    engine
        .set_assignees(&def_id, vec!["kid-a".into()], 0, at(2))
        .unwrap();
    // A second editor still holding version 0.
    let err = engine
        .set_assignees(&def_id, vec!["kid-b".into()], 0, at(2))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Engine(EngineError::ConcurrentModification { .. })
    ));
}

proptest! {
    // The cached balance equals the entry fold after any interleaving of
    // credits and debits, including rejected overdrafts.
    #[test]
    fn balance_always_equals_entry_fold(ops in prop::collection::vec((1i64..100, any::<bool>()), 1..40)) {
        let db = Database::open_memory().unwrap();
        let mut engine = RewardEngine::new(db, EngineConfig::default(), Box::new(Manual));
        engine
            .register_account("kid-1", "Kid", Role::Dependent, "fam-1", at(1))
            .unwrap();

        for (i, (amount, is_credit)) in ops.into_iter().enumerate() {
            let correlation = format!("op-{i}");
            if is_credit {
                engine.award("kid-1", amount, &correlation, at(2)).unwrap();
            } else {
                // Overdrafts are allowed to fail; state must stay intact.
                let _ = engine.redeem("kid-1", amount, &correlation, at(2));
            }
            let balance = engine.balance_of("kid-1").unwrap();
            let fold = Ledger::fold_for(engine.db().conn(), "kid-1").unwrap();
            prop_assert_eq!(balance, fold);
            prop_assert!(balance >= 0);
        }
    }
}
