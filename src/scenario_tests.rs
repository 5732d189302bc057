//! End-to-end scenarios: contribution confirmation with share recompute,
//! loan amortization and repayment, concurrent multi-signature approvals,
//! and the batch jobs. Each test drives the public engine APIs against a
//! fresh in-memory store.

use std::sync::Arc;
use std::time::Duration;

use crate::approvals::{ApprovalConfig, ApprovalWorkflow, SignOutcome};
use crate::batch::{CreditScoringEngine, IdleCashScanner};
use crate::contributions::{ConfirmOutcome, ContributionProcessor};
use crate::events::{DomainEventKind, EventBus};
use crate::ledger::{LedgerError, LedgerStore};
use crate::loans::LoanEngine;
use crate::models::{LoanStatus, MemberRole};
use crate::money::{amount_from_units, SHARE_SCALE};

struct Harness {
    store: Arc<LedgerStore>,
    events: EventBus,
    contributions: ContributionProcessor,
    loans: LoanEngine,
    approvals: ApprovalWorkflow,
}

fn harness() -> Harness {
    let store = Arc::new(LedgerStore::open_in_memory(Duration::from_secs(2)).expect("store"));
    let events = EventBus::new(256);
    Harness {
        contributions: ContributionProcessor::new(store.clone(), events.clone()),
        loans: LoanEngine::new(store.clone(), events.clone()),
        approvals: ApprovalWorkflow::new(store.clone(), events.clone(), ApprovalConfig::default()),
        store,
        events,
    }
}

async fn seed_group(h: &Harness, member_names: &[&str]) -> (i64, Vec<i64>) {
    let group = h
        .store
        .create_group("pamoja", amount_from_units(1_000), 12)
        .await
        .expect("group");
    let mut ids = Vec::new();
    for (i, name) in member_names.iter().enumerate() {
        let role = if i == 0 { MemberRole::Chair } else { MemberRole::Member };
        let m = h.store.add_member(group.id, name, role).await.expect("member");
        ids.push(m.id);
    }
    (group.id, ids)
}

async fn contribute(h: &Harness, member_id: i64, units: i64, reference: &str) {
    let c = h
        .store
        .record_contribution(member_id, amount_from_units(units), reference)
        .await
        .expect("record");
    let out = h.contributions.confirm(c.id).await.expect("confirm");
    assert!(matches!(out, ConfirmOutcome::Confirmed { .. }));
}

// =============================================================================
// CONTRIBUTIONS & SHARES
// =============================================================================

#[tokio::test]
async fn confirming_a_contribution_updates_balance_and_shares() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["amina", "baraka"]).await;

    // Prior state: 3000 and 7000 contributed.
    contribute(&h, members[0], 3_000, "m-1").await;
    contribute(&h, members[1], 7_000, "m-2").await;

    // New 2000 contribution from member A -> totals {5000, 7000}.
    contribute(&h, members[0], 2_000, "m-3").await;

    let group = h.store.get_group(group_id).await.unwrap();
    assert_eq!(group.balance, amount_from_units(12_000));

    let a = h.store.get_member(members[0]).await.unwrap();
    let b = h.store.get_member(members[1]).await.unwrap();
    assert_eq!(a.total_contributed, amount_from_units(5_000));
    // 5000/12000 and 7000/12000 in nano-shares
    assert!((a.contribution_share - 416_666_667).abs() <= 1, "A share {}", a.contribution_share);
    assert!((b.contribution_share - 583_333_333).abs() <= 1, "B share {}", b.contribution_share);
    assert_eq!(a.contribution_share + b.contribution_share, SHARE_SCALE);
}

#[tokio::test]
async fn confirm_is_idempotent_for_at_least_once_delivery() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["amina"]).await;

    let c = h
        .store
        .record_contribution(members[0], amount_from_units(500), "m-dup")
        .await
        .unwrap();
    let first = h.contributions.confirm(c.id).await.expect("first");
    let second = h.contributions.confirm(c.id).await.expect("redelivery");

    assert!(matches!(first, ConfirmOutcome::Confirmed { .. }));
    assert_eq!(second, ConfirmOutcome::AlreadyConfirmed);
    assert_eq!(
        h.store.get_group(group_id).await.unwrap().balance,
        amount_from_units(500)
    );
    assert_eq!(
        h.store.get_member(members[0]).await.unwrap().total_contributed,
        amount_from_units(500)
    );
}

#[tokio::test]
async fn reversal_restores_balance_and_shares() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["amina", "baraka"]).await;
    contribute(&h, members[0], 1_000, "m-a").await;
    contribute(&h, members[1], 1_000, "m-b").await;

    let c = h
        .store
        .record_contribution(members[0], amount_from_units(4_000), "m-rev")
        .await
        .unwrap();
    h.contributions.confirm(c.id).await.unwrap();
    assert_eq!(h.store.get_group(group_id).await.unwrap().balance, amount_from_units(6_000));

    let balance = h.contributions.reverse(c.id).await.expect("reverse");
    assert_eq!(balance, amount_from_units(2_000));

    let a = h.store.get_member(members[0]).await.unwrap();
    let b = h.store.get_member(members[1]).await.unwrap();
    assert_eq!(a.total_contributed, amount_from_units(1_000));
    assert_eq!(a.contribution_share, b.contribution_share);
    assert_eq!(a.contribution_share + b.contribution_share, SHARE_SCALE);

    // A second reversal of the same contribution is invalid, not double-applied.
    let err = h.contributions.reverse(c.id).await.expect_err("already reversed");
    assert!(matches!(err, LedgerError::InvalidContributionState(_)), "got {:?}", err);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_contributions_keep_shares_summing_to_one() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["a", "b", "c"]).await;

    let mut tasks = Vec::new();
    for (i, &member_id) in members.iter().enumerate() {
        let store = h.store.clone();
        let events = h.events.clone();
        tasks.push(tokio::spawn(async move {
            let processor = ContributionProcessor::new(store.clone(), events);
            for j in 0..5 {
                let reference = format!("m-{}-{}", i, j);
                let c = store
                    .record_contribution(member_id, amount_from_units(100 + i as i64), &reference)
                    .await
                    .expect("record");
                processor.confirm(c.id).await.expect("confirm");
            }
        }));
    }
    for t in tasks {
        t.await.expect("join");
    }

    let members = h.store.list_active_members(group_id).await.unwrap();
    let share_sum: i64 = members.iter().map(|m| m.contribution_share).sum();
    assert_eq!(share_sum, SHARE_SCALE);
    let group = h.store.get_group(group_id).await.unwrap();
    assert_eq!(group.balance, amount_from_units(5 * (100 + 101 + 102)));
    assert!(group.balance >= 0);
}

// =============================================================================
// LOANS
// =============================================================================

#[tokio::test]
async fn loan_amortization_and_partial_repayment() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["amina", "baraka", "chausiku"]).await;
    contribute(&h, members[0], 20_000, "m-fund").await;

    // principal 10000 at 10% over 10 months
    let loan = h
        .loans
        .apply(group_id, members[1], amount_from_units(10_000), 1_000, 10)
        .await
        .expect("apply");
    assert_eq!(loan.total_amount_due, amount_from_units(11_000));
    assert_eq!(loan.monthly_payment, amount_from_units(1_100));
    assert_eq!(loan.outstanding_balance, amount_from_units(11_000));
    assert_eq!(loan.status, LoanStatus::Pending);

    let approval = h
        .approvals
        .request_loan_disbursement(loan.id, 2)
        .await
        .expect("request");
    assert!(matches!(
        h.approvals.sign(approval.id, members[0], true).await.unwrap(),
        SignOutcome::SignatureRecorded
    ));
    assert!(matches!(
        h.approvals.sign(approval.id, members[2], true).await.unwrap(),
        SignOutcome::QuorumReached { .. }
    ));

    // Principal left the pool.
    assert_eq!(
        h.store.get_group(group_id).await.unwrap().balance,
        amount_from_units(10_000)
    );
    assert_eq!(h.store.get_loan(loan.id).await.unwrap().status, LoanStatus::Disbursed);

    // Five scheduled repayments.
    for i in 0..5 {
        let key = format!("rep-{}", i);
        h.loans
            .repay(loan.id, amount_from_units(1_100), &key)
            .await
            .expect("repay");
    }
    let loan = h.store.get_loan(loan.id).await.unwrap();
    assert_eq!(loan.outstanding_balance, amount_from_units(5_500));
    assert_eq!(loan.status, LoanStatus::Active);
    // Repayments flowed back into the pool.
    assert_eq!(
        h.store.get_group(group_id).await.unwrap().balance,
        amount_from_units(15_500)
    );
}

#[tokio::test]
async fn exact_payoff_completes_and_overpayment_is_rejected() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["amina", "baraka"]).await;
    contribute(&h, members[0], 5_000, "m-fund").await;

    let loan = h
        .loans
        .apply(group_id, members[1], amount_from_units(1_000), 0, 2)
        .await
        .unwrap();
    let approval = h.approvals.request_loan_disbursement(loan.id, 1).await.unwrap();
    h.approvals.sign(approval.id, members[0], true).await.unwrap();

    // Overpayment: rejected, outstanding unchanged.
    let err = h
        .loans
        .repay(loan.id, amount_from_units(1_500), "rep-over")
        .await
        .expect_err("overpayment");
    assert!(
        matches!(err, LedgerError::OverpaymentRejected { outstanding, offered, .. }
            if outstanding == amount_from_units(1_000) && offered == amount_from_units(1_500)),
        "got {:?}",
        err
    );
    assert_eq!(
        h.store.get_loan(loan.id).await.unwrap().outstanding_balance,
        amount_from_units(1_000)
    );

    // Exact payoff completes the loan and emits the completion event.
    let mut rx = h.events.subscribe();
    let outstanding = h
        .loans
        .repay(loan.id, amount_from_units(1_000), "rep-final")
        .await
        .expect("payoff");
    assert_eq!(outstanding, 0);
    let loan = h.store.get_loan(loan.id).await.unwrap();
    assert_eq!(loan.status, LoanStatus::Completed);
    let event = rx.recv().await.expect("event");
    assert!(matches!(event.kind, DomainEventKind::LoanCompleted { .. }));

    // Completed is terminal: further repayments are invalid.
    let err = h
        .loans
        .repay(loan.id, amount_from_units(10), "rep-late")
        .await
        .expect_err("terminal");
    assert!(matches!(err, LedgerError::InvalidLoanState(LoanStatus::Completed)));
}

#[tokio::test]
async fn repay_replay_does_not_double_apply() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["amina", "baraka"]).await;
    contribute(&h, members[0], 5_000, "m-fund").await;

    let loan = h
        .loans
        .apply(group_id, members[1], amount_from_units(2_000), 0, 4)
        .await
        .unwrap();
    let approval = h.approvals.request_loan_disbursement(loan.id, 1).await.unwrap();
    h.approvals.sign(approval.id, members[0], true).await.unwrap();

    let first = h.loans.repay(loan.id, amount_from_units(500), "rep-1").await.unwrap();
    let replay = h.loans.repay(loan.id, amount_from_units(500), "rep-1").await.unwrap();
    assert_eq!(first, amount_from_units(1_500));
    assert_eq!(replay, amount_from_units(1_500));
    assert_eq!(
        h.store.get_loan(loan.id).await.unwrap().outstanding_balance,
        amount_from_units(1_500)
    );
    // Only one repayment row exists for the key's single application.
    assert_eq!(h.store.list_repayments(loan.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn funds_release_requires_the_approved_transition() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["amina", "baraka"]).await;
    contribute(&h, members[0], 5_000, "m-fund").await;

    let loan = h
        .loans
        .apply(group_id, members[1], amount_from_units(1_000), 0, 2)
        .await
        .unwrap();

    // A loan that never passed through Approved cannot release funds.
    let err = h
        .store
        .with_group_tx(group_id, |tx| {
            crate::loans::disburse_loan_tx(tx, loan.id).map(|_| ())
        })
        .await
        .expect_err("still pending");
    assert!(matches!(err, LedgerError::InvalidLoanState(LoanStatus::Pending)), "got {:?}", err);
    assert_eq!(h.store.get_loan(loan.id).await.unwrap().status, LoanStatus::Pending);

    // The workflow records Approved and Disbursed in the quorum transaction.
    let approval = h.approvals.request_loan_disbursement(loan.id, 1).await.unwrap();
    assert!(matches!(
        h.approvals.sign(approval.id, members[0], true).await.unwrap(),
        SignOutcome::QuorumReached { .. }
    ));
    assert_eq!(h.store.get_loan(loan.id).await.unwrap().status, LoanStatus::Disbursed);
}

#[tokio::test]
async fn defaulted_loan_refuses_repayment() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["amina", "baraka"]).await;
    contribute(&h, members[0], 5_000, "m-fund").await;

    let loan = h
        .loans
        .apply(group_id, members[1], amount_from_units(1_000), 500, 6)
        .await
        .unwrap();
    let approval = h.approvals.request_loan_disbursement(loan.id, 1).await.unwrap();
    h.approvals.sign(approval.id, members[0], true).await.unwrap();

    h.loans.mark_defaulted(loan.id).await.expect("default");
    let err = h
        .loans
        .repay(loan.id, amount_from_units(100), "rep-x")
        .await
        .expect_err("defaulted is terminal");
    assert!(matches!(err, LedgerError::InvalidLoanState(LoanStatus::Defaulted)));
}

// =============================================================================
// MULTI-SIGNATURE APPROVALS
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_signers_trigger_disbursement_exactly_once() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["a", "b", "c", "d", "e"]).await;
    contribute(&h, members[0], 10_000, "m-fund").await;

    let approval = h
        .approvals
        .request_expense(group_id, "meeting hall repair", amount_from_units(2_000), 2)
        .await
        .expect("request");

    let mut rx = h.events.subscribe();
    let mut tasks = Vec::new();
    for &signer in &members[0..3] {
        let store = h.store.clone();
        let events = h.events.clone();
        let approval_id = approval.id;
        tasks.push(tokio::spawn(async move {
            let workflow = ApprovalWorkflow::new(store, events, ApprovalConfig::default());
            workflow.sign(approval_id, signer, true).await.expect("sign")
        }));
    }

    let mut quorum_hits = 0;
    for t in tasks {
        match t.await.expect("join") {
            SignOutcome::QuorumReached { .. } => quorum_hits += 1,
            SignOutcome::SignatureRecorded | SignOutcome::AlreadyFinalized(_) => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(quorum_hits, 1, "quorum transition must fire exactly once");

    // Balance debited exactly once.
    assert_eq!(
        h.store.get_group(group_id).await.unwrap().balance,
        amount_from_units(8_000)
    );
    let approval = h.store.get_approval(approval.id).await.unwrap();
    assert!(approval.approvals_count >= approval.required_approvals);
    assert_eq!(approval.status, crate::models::ApprovalStatus::Approved);

    // Exactly one quorum event on the bus.
    let mut quorum_events = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event.kind, DomainEventKind::ApprovalReachedQuorum { .. }) {
            quorum_events += 1;
        }
    }
    assert_eq!(quorum_events, 1);
}

#[tokio::test]
async fn signer_cannot_sign_twice() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["a", "b", "c"]).await;
    contribute(&h, members[0], 1_000, "m-fund").await;

    let approval = h
        .approvals
        .request_expense(group_id, "stationery", amount_from_units(100), 2)
        .await
        .unwrap();

    assert!(matches!(
        h.approvals.sign(approval.id, members[1], true).await.unwrap(),
        SignOutcome::SignatureRecorded
    ));
    assert_eq!(
        h.approvals.sign(approval.id, members[1], true).await.unwrap(),
        SignOutcome::AlreadySigned
    );
    // Still one vote on the record.
    assert_eq!(h.store.get_approval(approval.id).await.unwrap().approvals_count, 1);
    assert_eq!(h.store.list_signatures(approval.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn no_votes_count_participation_but_not_quorum() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["a", "b", "c", "d", "e"]).await;
    contribute(&h, members[0], 1_000, "m-fund").await;

    let approval = h
        .approvals
        .request_expense(group_id, "speculative venture", amount_from_units(500), 3)
        .await
        .unwrap();

    assert!(matches!(
        h.approvals.sign(approval.id, members[0], false).await.unwrap(),
        SignOutcome::SignatureRecorded
    ));
    assert!(matches!(
        h.approvals.sign(approval.id, members[1], false).await.unwrap(),
        SignOutcome::SignatureRecorded
    ));
    let record = h.store.get_approval(approval.id).await.unwrap();
    assert_eq!(record.approvals_count, 0);
    assert_eq!(record.status, crate::models::ApprovalStatus::Pending);

    // Third no-vote tips the explicit majority (3 of 5): rejected.
    assert_eq!(
        h.approvals.sign(approval.id, members[2], false).await.unwrap(),
        SignOutcome::Rejected
    );
    let record = h.store.get_approval(approval.id).await.unwrap();
    assert_eq!(record.status, crate::models::ApprovalStatus::Rejected);

    // Terminal: late yes-vote observes finality.
    assert!(matches!(
        h.approvals.sign(approval.id, members[3], true).await.unwrap(),
        SignOutcome::AlreadyFinalized(crate::models::ApprovalStatus::Rejected)
    ));
}

#[tokio::test]
async fn rejected_loan_approval_rejects_the_loan() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["a", "b", "c"]).await;
    contribute(&h, members[0], 5_000, "m-fund").await;

    let loan = h
        .loans
        .apply(group_id, members[1], amount_from_units(1_000), 0, 2)
        .await
        .unwrap();
    let approval = h.approvals.request_loan_disbursement(loan.id, 3).await.unwrap();

    h.approvals.sign(approval.id, members[0], false).await.unwrap();
    assert_eq!(
        h.approvals.sign(approval.id, members[1], false).await.unwrap(),
        SignOutcome::Rejected
    );
    assert_eq!(h.store.get_loan(loan.id).await.unwrap().status, LoanStatus::Rejected);
    // Balance untouched.
    assert_eq!(
        h.store.get_group(group_id).await.unwrap().balance,
        amount_from_units(5_000)
    );
}

#[tokio::test]
async fn member_with_approval_signatures_cannot_be_hard_deleted() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["a", "b", "c"]).await;
    contribute(&h, members[0], 5_000, "m-fund").await;

    let approval = h
        .approvals
        .request_expense(group_id, "audit fee", amount_from_units(1_000), 2)
        .await
        .unwrap();
    // This signer has contributed nothing; their only history is the vote.
    assert!(matches!(
        h.approvals.sign(approval.id, members[1], true).await.unwrap(),
        SignOutcome::SignatureRecorded
    ));

    let err = h.store.delete_member(members[1]).await.expect_err("vote is history");
    assert!(
        matches!(err, LedgerError::MemberHasHistory { signatures: 1, .. }),
        "got {:?}",
        err
    );

    // The counted vote still stands behind a live signature row; quorum
    // needs a genuine second signature.
    assert_eq!(h.store.get_approval(approval.id).await.unwrap().approvals_count, 1);
    assert!(matches!(
        h.approvals.sign(approval.id, members[2], true).await.unwrap(),
        SignOutcome::QuorumReached { .. }
    ));
    assert_eq!(h.store.list_signatures(approval.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn zero_signature_quorum_is_rejected_up_front() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["a", "b"]).await;
    contribute(&h, members[0], 1_000, "m-fund").await;

    let err = h
        .approvals
        .request_expense(group_id, "free pass", amount_from_units(100), 0)
        .await
        .expect_err("zero quorum");
    assert!(matches!(err, LedgerError::InvalidQuorum(0)), "got {:?}", err);

    let loan = h
        .loans
        .apply(group_id, members[1], amount_from_units(100), 0, 1)
        .await
        .unwrap();
    let err = h
        .approvals
        .request_loan_disbursement(loan.id, 0)
        .await
        .expect_err("zero quorum");
    assert!(matches!(err, LedgerError::InvalidQuorum(0)));
}

#[tokio::test]
async fn expense_beyond_balance_fails_without_partial_state() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["a", "b"]).await;
    contribute(&h, members[0], 100, "m-fund").await;

    let approval = h
        .approvals
        .request_expense(group_id, "too big", amount_from_units(500), 1)
        .await
        .unwrap();

    let err = h
        .approvals
        .sign(approval.id, members[1], true)
        .await
        .expect_err("insufficient funds");
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }), "got {:?}", err);

    // Whole transaction rolled back: no signature, no count, still pending.
    let record = h.store.get_approval(approval.id).await.unwrap();
    assert_eq!(record.approvals_count, 0);
    assert_eq!(record.status, crate::models::ApprovalStatus::Pending);
    assert!(h.store.list_signatures(approval.id).await.unwrap().is_empty());
}

// =============================================================================
// BATCH JOBS
// =============================================================================

#[tokio::test]
async fn credit_scoring_pass_writes_bounded_scores() {
    let h = harness();
    let (_, members) = seed_group(&h, &["amina", "baraka"]).await;
    contribute(&h, members[0], 1_000, "m-1").await;
    h.store.record_attendance(members[0], true).await.unwrap();
    h.store.record_attendance(members[1], false).await.unwrap();

    let engine = CreditScoringEngine::new(h.store.clone());
    let summary = engine.run().await.expect("pass");
    assert_eq!(summary.scored, 2);
    assert_eq!(summary.failed, 0);

    for &id in &members {
        let member = h.store.get_member(id).await.unwrap();
        assert!(member.credit_score <= 100);
    }
    // Contributing, attending member outscores the absent non-contributor.
    let a = h.store.get_member(members[0]).await.unwrap();
    let b = h.store.get_member(members[1]).await.unwrap();
    assert!(a.credit_score > b.credit_score, "{} vs {}", a.credit_score, b.credit_score);

    // Re-running overwrites idempotently.
    let again = engine.run().await.expect("second pass");
    assert_eq!(again.scored, 2);
    assert_eq!(h.store.get_member(members[0]).await.unwrap().credit_score, a.credit_score);
}

#[tokio::test]
async fn idle_cash_scanner_flags_only_aged_confirmed_funds() {
    let h = harness();
    let (group_id, members) = seed_group(&h, &["amina"]).await;
    contribute(&h, members[0], 800, "m-aged").await;
    // A pending contribution never counts.
    h.store
        .record_contribution(members[0], amount_from_units(300), "m-pending")
        .await
        .unwrap();

    // Window of zero days: everything confirmed so far is idle.
    let scanner = IdleCashScanner::new(h.store.clone(), 0);
    let summary = scanner.run().await.expect("scan");
    assert_eq!(summary.groups_scanned, 1);
    assert_eq!(summary.groups_failed, 0);
    assert_eq!(
        h.store.get_group(group_id).await.unwrap().idle_cash,
        amount_from_units(800)
    );

    // Thirty-day window: nothing this fresh is idle; overwrite drops to zero.
    let scanner = IdleCashScanner::new(h.store.clone(), 30);
    scanner.run().await.expect("scan");
    assert_eq!(h.store.get_group(group_id).await.unwrap().idle_cash, 0);
}

#[tokio::test]
async fn scan_failure_in_one_group_does_not_stop_the_rest() {
    let h = harness();
    let (poisoned, members_a) = seed_group(&h, &["amina"]).await;
    let (healthy, members_b) = seed_group(&h, &["baraka"]).await;
    contribute(&h, members_a[0], 400, "m-a").await;
    contribute(&h, members_b[0], 900, "m-b").await;

    // The first group's idle-cash write hits a storage fault.
    h.store
        .execute_raw(&format!(
            "CREATE TRIGGER idle_write_fault BEFORE UPDATE OF idle_cash ON groups \
             WHEN NEW.id = {} BEGIN SELECT RAISE(ABORT, 'disk fault'); END",
            poisoned
        ))
        .await
        .unwrap();

    let scanner = IdleCashScanner::new(h.store.clone(), 0);
    let summary = scanner.run().await.expect("scan survives");
    assert_eq!(summary.groups_failed, 1);
    assert_eq!(summary.groups_scanned, 1);

    assert_eq!(
        h.store.get_group(healthy).await.unwrap().idle_cash,
        amount_from_units(900)
    );
    assert_eq!(h.store.get_group(poisoned).await.unwrap().idle_cash, 0);
}

#[tokio::test]
async fn scoring_failure_for_one_member_does_not_stop_the_pass() {
    let h = harness();
    let (_, members) = seed_group(&h, &["amina", "baraka"]).await;
    contribute(&h, members[0], 1_000, "m-1").await;

    h.store
        .execute_raw(&format!(
            "CREATE TRIGGER score_write_fault BEFORE UPDATE OF credit_score ON members \
             WHEN NEW.id = {} BEGIN SELECT RAISE(ABORT, 'disk fault'); END",
            members[0]
        ))
        .await
        .unwrap();

    let engine = CreditScoringEngine::new(h.store.clone());
    let summary = engine.run().await.expect("pass survives");
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.scored, 1);
    // The unaffected member still got a score written.
    assert!(h.store.get_member(members[1]).await.unwrap().credit_score > 0);
}
