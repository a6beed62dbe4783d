// crates/rollout-core/tests/reconciler.rs
// ============================================================================
// Module: Reconciliation Loop Tests
// Description: Drift classification, remediation policy, and attempt bounds.
// Purpose: Validate detection precedence and bounded auto-remediation.
// ============================================================================

//! ## Overview
//! Tests for the reconciliation loop:
//! - Classification precedence: missing assignment, version, scope, compliance
//! - Auto-remediation issues the right action in non-production rings
//! - Scope mismatches, production rings, and CAB-required intents report only
//! - Exponential backoff with a hard attempt bound escalating to persistent
//! - Escalated drift stays persistent until it resolves or a revision lands
//! - Clean state clears attempt tracking; query failures are absorbed

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;
use std::sync::Mutex;

use rollout_core::AdapterError;
use rollout_core::AdapterId;
use rollout_core::AdapterStatusReport;
use rollout_core::ApplicationId;
use rollout_core::ArtifactId;
use rollout_core::ArtifactReference;
use rollout_core::ArtifactRiskProfile;
use rollout_core::ConnectivityClass;
use rollout_core::CorrelationId;
use rollout_core::DeploymentIntent;
use rollout_core::DriftSeverity;
use rollout_core::DriftType;
use rollout_core::InMemoryEventSink;
use rollout_core::InMemoryIntentStore;
use rollout_core::InstallContext;
use rollout_core::IntentId;
use rollout_core::IntentStatus;
use rollout_core::IntentStore;
use rollout_core::PublishReceipt;
use rollout_core::Reconciler;
use rollout_core::ReconcilerConfig;
use rollout_core::ReconcilerGateway;
use rollout_core::RemediationAction;
use rollout_core::RemediationOutcome;
use rollout_core::RevisionNumber;
use rollout_core::Ring;
use rollout_core::RingCalibration;
use rollout_core::RiskModel;
use rollout_core::RollbackMaturity;
use rollout_core::RollbackPlan;
use rollout_core::SignatureState;
use rollout_core::StatusSnapshot;
use rollout_core::TargetScope;
use rollout_core::Timestamp;
use rollout_core::WallClock;
use rollout_core::assess;
use rollout_core::classify_drift;

type TestResult = Result<(), String>;

/// Base time for all scenarios, advanced in whole hours.
const T0: i64 = 1_700_000_000_000;

fn at(hours: u32) -> Timestamp {
    Timestamp::from_unix_millis(T0).plus_hours(hours)
}

/// Wall clock driven manually by the test.
struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    fn new(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    fn set(&self, now: Timestamp) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.lock().map_or(Timestamp::from_unix_millis(0), |guard| *guard)
    }
}

/// Gateway stub returning a scripted status report.
struct ScriptedGateway {
    report: Mutex<Result<AdapterStatusReport, AdapterError>>,
    remediations: Mutex<Vec<(IntentId, RemediationAction)>>,
}

impl ScriptedGateway {
    fn reporting(report: AdapterStatusReport) -> Self {
        Self {
            report: Mutex::new(Ok(report)),
            remediations: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            report: Mutex::new(Err(AdapterError::transient("plane unavailable"))),
            remediations: Mutex::new(Vec::new()),
        }
    }

    fn set_report(&self, report: AdapterStatusReport) {
        if let Ok(mut guard) = self.report.lock() {
            *guard = Ok(report);
        }
    }

    fn issued(&self) -> Vec<(IntentId, RemediationAction)> {
        self.remediations.lock().map_or_else(|_| Vec::new(), |guard| guard.clone())
    }
}

impl ReconcilerGateway for ScriptedGateway {
    fn query_status(&self, intent: &DeploymentIntent) -> Result<StatusSnapshot, AdapterError> {
        let report = self
            .report
            .lock()
            .map_err(|_| AdapterError::permanent("report lock poisoned"))?
            .clone()?;
        Ok(StatusSnapshot {
            correlation_id: CorrelationId::new(format!("corr-{}", intent.intent_id)),
            report,
        })
    }

    fn remediate(
        &self,
        intent: &DeploymentIntent,
        action: RemediationAction,
    ) -> Result<PublishReceipt, AdapterError> {
        if let Ok(mut guard) = self.remediations.lock() {
            guard.push((intent.intent_id.clone(), action));
        }
        Ok(PublishReceipt {
            status: "accepted".to_string(),
            provider_object_id: "obj-remediation".to_string(),
        })
    }
}

fn intent_in_ring(id: &str, ring: Ring, cab_required: bool, entered_at: Timestamp) -> DeploymentIntent {
    let target_scope = TargetScope {
        connectivity: ConnectivityClass::Online,
        org_unit: "ou-finance".to_string(),
        rings: Ring::ALL.to_vec(),
    };
    let profile = ArtifactRiskProfile {
        install_context: Some(InstallContext::User),
        reboot_required: Some(false),
        kernel_component: Some(false),
        signature: Some(SignatureState::SignedTrusted),
        rollback_maturity: Some(RollbackMaturity::Validated),
        privileged_tooling: cab_required,
    };
    let assessment = assess(&profile, &target_scope, &RiskModel::baseline())
        .unwrap_or_else(|err| panic!("fixture assessment failed: {err}"));
    DeploymentIntent {
        intent_id: IntentId::new(id),
        application_id: ApplicationId::new(format!("app-{id}")),
        adapter_id: AdapterId::new("mdm-east"),
        revision: RevisionNumber::first(),
        artifact: ArtifactReference {
            artifact_id: ArtifactId::new("pkg-ledgerd"),
            version: "2.1.0".to_string(),
        },
        target_scope,
        schedule: Vec::new(),
        calibration_version: "cal-v1".to_string(),
        rollback_plan: RollbackPlan {
            reference: "rbk-2024-117".to_string(),
            validated: true,
        },
        risk: Some(assessment),
        approval: None,
        current_ring: Some(ring),
        status: IntentStatus::RingInProgress { ring },
        concurrency_override: false,
        created_at: entered_at,
        updated_at: entered_at,
    }
}

fn in_sync_report() -> AdapterStatusReport {
    AdapterStatusReport {
        assigned: true,
        installed_version: Some("2.1.0".to_string()),
        scope_org_unit: Some("ou-finance".to_string()),
        success_count: 100,
        failure_count: 0,
        pending_count: 0,
    }
}

struct Fixture {
    reconciler: Reconciler,
    store: Arc<InMemoryIntentStore>,
    gateway: Arc<ScriptedGateway>,
    clock: Arc<ManualClock>,
}

fn fixture_with(gateway: ScriptedGateway, now: Timestamp, config: ReconcilerConfig) -> Fixture {
    let store = Arc::new(InMemoryIntentStore::new());
    let gateway = Arc::new(gateway);
    let clock = Arc::new(ManualClock::new(now));
    let reconciler = Reconciler::new(
        store.clone(),
        gateway.clone(),
        Arc::new(InMemoryEventSink::new()),
        RingCalibration::baseline(),
        clock.clone(),
        config,
    );
    Fixture {
        reconciler,
        store,
        gateway,
        clock,
    }
}

fn fixture(gateway: ScriptedGateway, now: Timestamp) -> Fixture {
    fixture_with(gateway, now, ReconcilerConfig::default())
}

#[test]
fn classification_precedence_is_stable() -> TestResult {
    let intent = intent_in_ring("int-1", Ring::Canary, false, at(0));

    let mut report = in_sync_report();
    report.assigned = false;
    // An older installed version with a missing assignment is still missing.
    report.installed_version = Some("2.0.5".to_string());
    if classify_drift(&intent, &report, 1, 24) != Some(DriftType::MissingAssignment) {
        return Err("missing assignment subsumes other categories".to_string());
    }

    // Assigned but running 2.0.5 against an intended 2.1.0 is a version
    // mismatch, not a missing assignment.
    let mut report = in_sync_report();
    report.installed_version = Some("2.0.5".to_string());
    if classify_drift(&intent, &report, 1, 24) != Some(DriftType::VersionMismatch) {
        return Err("stale version must classify as version mismatch".to_string());
    }
    // An assigned cohort with no reported version also fails the version check.
    report.installed_version = None;
    if classify_drift(&intent, &report, 1, 24) != Some(DriftType::VersionMismatch) {
        return Err("unknown version must classify as version mismatch".to_string());
    }

    let mut report = in_sync_report();
    report.scope_org_unit = Some("ou-eng".to_string());
    if classify_drift(&intent, &report, 1, 24) != Some(DriftType::ScopeMismatch) {
        return Err("foreign scope must classify as scope mismatch".to_string());
    }

    let mut report = in_sync_report();
    report.pending_count = 5;
    if classify_drift(&intent, &report, 30, 24) != Some(DriftType::ComplianceDrift) {
        return Err("pending beyond the ceiling must classify as compliance drift".to_string());
    }
    if classify_drift(&intent, &report, 24, 24).is_some() {
        return Err("pending within the ceiling is not drift".to_string());
    }

    if classify_drift(&intent, &in_sync_report(), 1, 24).is_some() {
        return Err("an in-sync report is not drift".to_string());
    }
    Ok(())
}

#[test]
fn missing_assignment_is_reassigned() -> TestResult {
    let mut report = in_sync_report();
    report.assigned = false;
    let fx = fixture(ScriptedGateway::reporting(report), at(1));
    fx.store
        .save(&intent_in_ring("int-2", Ring::Canary, false, at(0)))
        .map_err(|err| err.to_string())?;

    let outcome = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if outcome.drift_events.len() != 1 {
        return Err(format!("expected one drift event, got {}", outcome.drift_events.len()));
    }
    let event = &outcome.drift_events[0];
    if event.drift != DriftType::MissingAssignment || event.severity != DriftSeverity::High {
        return Err(format!("unexpected event: {event:?}"));
    }
    if event.remediation != (RemediationOutcome::Attempted { attempt: 1 }) {
        return Err(format!("unexpected remediation: {:?}", event.remediation));
    }
    let issued = fx.gateway.issued();
    if issued != vec![(IntentId::new("int-2"), RemediationAction::Reassign)] {
        return Err(format!("unexpected actions: {issued:?}"));
    }
    if outcome.remediations_issued != 1 {
        return Err("report must count the issued remediation".to_string());
    }
    Ok(())
}

#[test]
fn scope_mismatch_is_critical_and_report_only() -> TestResult {
    let mut report = in_sync_report();
    report.scope_org_unit = Some("ou-eng".to_string());
    let fx = fixture(ScriptedGateway::reporting(report), at(1));
    fx.store
        .save(&intent_in_ring("int-3", Ring::Lab, false, at(0)))
        .map_err(|err| err.to_string())?;

    let outcome = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    let event = &outcome.drift_events[0];
    if event.drift != DriftType::ScopeMismatch || event.severity != DriftSeverity::Critical {
        return Err(format!("unexpected event: {event:?}"));
    }
    if event.remediation != RemediationOutcome::ReportOnly {
        return Err("scope mismatches are never auto-remediated".to_string());
    }
    if !fx.gateway.issued().is_empty() {
        return Err("no remediation action may be issued for scope drift".to_string());
    }
    Ok(())
}

#[test]
fn production_rings_are_report_only() -> TestResult {
    let mut report = in_sync_report();
    report.installed_version = Some("2.0.5".to_string());
    let fx = fixture(ScriptedGateway::reporting(report), at(1));
    fx.store
        .save(&intent_in_ring("int-4", Ring::Department, false, at(0)))
        .map_err(|err| err.to_string())?;

    let outcome = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    let event = &outcome.drift_events[0];
    if event.drift != DriftType::VersionMismatch {
        return Err(format!("unexpected drift: {:?}", event.drift));
    }
    if event.remediation != RemediationOutcome::ReportOnly {
        return Err("production drift is never auto-remediated".to_string());
    }
    if !fx.gateway.issued().is_empty() {
        return Err("no remediation action may reach production rings".to_string());
    }
    Ok(())
}

#[test]
fn cab_required_intents_are_report_only() -> TestResult {
    let mut report = in_sync_report();
    report.installed_version = Some("2.0.5".to_string());
    let fx = fixture(ScriptedGateway::reporting(report), at(1));
    fx.store
        .save(&intent_in_ring("int-5", Ring::Canary, true, at(0)))
        .map_err(|err| err.to_string())?;

    let outcome = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if outcome.drift_events[0].remediation != RemediationOutcome::ReportOnly {
        return Err("CAB-required intents are never auto-remediated".to_string());
    }
    if !fx.gateway.issued().is_empty() {
        return Err("no remediation action may be issued for CAB-required intents".to_string());
    }
    Ok(())
}

#[test]
fn attempts_back_off_and_escalate_to_persistent() -> TestResult {
    let mut report = in_sync_report();
    report.installed_version = Some("2.0.5".to_string());
    let fx = fixture(ScriptedGateway::reporting(report), at(1));
    fx.store
        .save(&intent_in_ring("int-6", Ring::Canary, false, at(0)))
        .map_err(|err| err.to_string())?;

    // First pass: attempt 1, next attempt after the 1h base backoff.
    let first = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if first.drift_events[0].remediation != (RemediationOutcome::Attempted { attempt: 1 }) {
        return Err(format!("unexpected first outcome: {:?}", first.drift_events[0].remediation));
    }

    // Half an hour later, inside the backoff window: nothing is issued.
    fx.clock.set(Timestamp::from_unix_millis(at(1).as_unix_millis() + 1_800_000));
    let held = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    match held.drift_events[0].remediation {
        RemediationOutcome::Scheduled { attempt: 2, .. } => {}
        other => return Err(format!("expected scheduled outcome, got {other:?}")),
    }

    // Advancing past each backoff (1h, then 2h, then 4h) issues the next
    // attempt until the bound; the fourth detection is persistent.
    fx.clock.set(at(3));
    let second = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if second.drift_events[0].remediation != (RemediationOutcome::Attempted { attempt: 2 }) {
        return Err(format!("unexpected second outcome: {:?}", second.drift_events[0].remediation));
    }
    fx.clock.set(at(6));
    let third = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if third.drift_events[0].remediation != (RemediationOutcome::Attempted { attempt: 3 }) {
        return Err(format!("unexpected third outcome: {:?}", third.drift_events[0].remediation));
    }
    fx.clock.set(at(12));
    let fourth = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if fourth.drift_events[0].remediation != RemediationOutcome::Persistent {
        return Err(format!("unexpected fourth outcome: {:?}", fourth.drift_events[0].remediation));
    }
    if fourth.persistent != 1 {
        return Err("report must count the persistent drift".to_string());
    }

    // Still unresolved much later: escalation is sticky, the cycle does not
    // restart at attempt 1.
    fx.clock.set(at(48));
    let fifth = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if fifth.drift_events[0].remediation != RemediationOutcome::Persistent {
        return Err(format!("unexpected fifth outcome: {:?}", fifth.drift_events[0].remediation));
    }

    let issued = fx.gateway.issued();
    if issued.len() != 3 {
        return Err(format!("expected exactly three remediations, got {}", issued.len()));
    }
    if issued.iter().any(|(_, action)| *action != RemediationAction::Reinstall) {
        return Err("version drift remediates by reinstall".to_string());
    }
    Ok(())
}

#[test]
fn resolved_drift_clears_attempt_state() -> TestResult {
    let mut report = in_sync_report();
    report.installed_version = Some("2.0.5".to_string());
    let fx = fixture(ScriptedGateway::reporting(report), at(1));
    fx.store
        .save(&intent_in_ring("int-7", Ring::Canary, false, at(0)))
        .map_err(|err| err.to_string())?;

    let first = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if first.drift_events[0].remediation != (RemediationOutcome::Attempted { attempt: 1 }) {
        return Err("expected a first attempt".to_string());
    }

    // The cohort converges; the counter resets.
    fx.gateway.set_report(in_sync_report());
    fx.clock.set(at(3));
    let clean = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if !clean.drift_events.is_empty() {
        return Err("an in-sync cohort must not report drift".to_string());
    }

    // Re-detection later starts over at attempt 1.
    let mut stale = in_sync_report();
    stale.installed_version = Some("2.0.5".to_string());
    fx.gateway.set_report(stale);
    fx.clock.set(at(10));
    let again = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if again.drift_events[0].remediation != (RemediationOutcome::Attempted { attempt: 1 }) {
        return Err(format!("expected a fresh attempt, got {:?}", again.drift_events[0].remediation));
    }
    Ok(())
}

#[test]
fn a_new_revision_restarts_the_attempt_cycle() -> TestResult {
    let mut report = in_sync_report();
    report.installed_version = Some("2.0.5".to_string());
    let config = ReconcilerConfig {
        max_attempts: 1,
        ..ReconcilerConfig::default()
    };
    let fx = fixture_with(ScriptedGateway::reporting(report), at(1), config);
    fx.store
        .save(&intent_in_ring("int-11", Ring::Canary, false, at(0)))
        .map_err(|err| err.to_string())?;

    let first = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if first.drift_events[0].remediation != (RemediationOutcome::Attempted { attempt: 1 }) {
        return Err("expected a first attempt".to_string());
    }

    // The single-attempt budget is spent; the drift escalates and stays there.
    fx.clock.set(at(3));
    let second = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if second.drift_events[0].remediation != RemediationOutcome::Persistent {
        return Err(format!("expected escalation, got {:?}", second.drift_events[0].remediation));
    }
    fx.clock.set(at(6));
    let third = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if third.drift_events[0].remediation != RemediationOutcome::Persistent {
        return Err(format!("escalation must hold, got {:?}", third.drift_events[0].remediation));
    }

    // Operators publish a corrected revision of the same intent; the budget
    // applies to the new rollout from scratch.
    let mut revised = intent_in_ring("int-11", Ring::Canary, false, at(6));
    revised.revision =
        RevisionNumber::from_raw(2).ok_or_else(|| "revision fixture".to_string())?;
    fx.store.save(&revised).map_err(|err| err.to_string())?;
    fx.clock.set(at(9));
    let fresh = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if fresh.drift_events[0].remediation != (RemediationOutcome::Attempted { attempt: 1 }) {
        return Err(format!("expected a fresh attempt, got {:?}", fresh.drift_events[0].remediation));
    }

    let issued = fx.gateway.issued();
    if issued.len() != 2 {
        return Err(format!("expected two remediations across revisions, got {}", issued.len()));
    }
    Ok(())
}

#[test]
fn query_failures_are_absorbed_into_the_report() -> TestResult {
    let fx = fixture(ScriptedGateway::failing(), at(1));
    fx.store
        .save(&intent_in_ring("int-8", Ring::Lab, false, at(0)))
        .map_err(|err| err.to_string())?;

    let outcome = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if outcome.query_failures != 1 {
        return Err(format!("expected one query failure, got {}", outcome.query_failures));
    }
    if !outcome.drift_events.is_empty() {
        return Err("an unreadable plane must not fabricate drift".to_string());
    }
    Ok(())
}

#[test]
fn completed_intents_stay_in_the_scan_window() -> TestResult {
    let mut report = in_sync_report();
    report.installed_version = Some("2.0.5".to_string());
    let fx = fixture(ScriptedGateway::reporting(report), at(100));

    let mut completed = intent_in_ring("int-9", Ring::Global, false, at(50));
    completed.status = IntentStatus::Completed;
    fx.store.save(&completed).map_err(|err| err.to_string())?;

    // Rolled-back intents are out of scope even when recent.
    let mut rolled_back = intent_in_ring("int-10", Ring::Canary, false, at(90));
    rolled_back.status = IntentStatus::RolledBack {
        from: Ring::Canary,
        reason: "test".to_string(),
    };
    fx.store.save(&rolled_back).map_err(|err| err.to_string())?;

    let outcome = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if outcome.scanned != 1 {
        return Err(format!("expected one scanned intent, got {}", outcome.scanned));
    }
    let event = &outcome.drift_events[0];
    if event.intent_id != IntentId::new("int-9") || event.drift != DriftType::VersionMismatch {
        return Err(format!("unexpected event: {event:?}"));
    }
    // Completed intents sit in the global ring: report-only.
    if event.remediation != RemediationOutcome::ReportOnly {
        return Err("completed-window drift in production is report-only".to_string());
    }

    // Outside the window the completed intent drops out of the scan.
    fx.clock.set(at(50).plus_hours(169));
    let later = fx.reconciler.run_once().map_err(|err| err.to_string())?;
    if later.scanned != 0 {
        return Err(format!("expected empty scan, got {}", later.scanned));
    }
    Ok(())
}
