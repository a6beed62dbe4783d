// crates/rollout-store-sqlite/tests/proptest_store.rs
// ============================================================================
// Module: SQLite Store Property-Based Tests
// Description: Property tests for snapshot round-trips and hash integrity.
// Purpose: Detect integrity violations across wide intent shapes.
// ============================================================================

//! Property-based tests for the durable store's integrity invariants.

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
    reason = "Test-only assertions and helpers are permitted."
)]

use proptest::prelude::*;
use rusqlite::Connection;
use rusqlite::params;
use tempfile::TempDir;

use rollout_core::AdapterId;
use rollout_core::ApplicationId;
use rollout_core::ArtifactId;
use rollout_core::ArtifactReference;
use rollout_core::ArtifactRiskProfile;
use rollout_core::ConnectivityClass;
use rollout_core::DeploymentIntent;
use rollout_core::InstallContext;
use rollout_core::IntentId;
use rollout_core::IntentStatus;
use rollout_core::IntentStore;
use rollout_core::RevisionNumber;
use rollout_core::Ring;
use rollout_core::RiskModel;
use rollout_core::RollbackMaturity;
use rollout_core::RollbackPlan;
use rollout_core::SignatureState;
use rollout_core::StoreError;
use rollout_core::TargetScope;
use rollout_core::Timestamp;
use rollout_core::assess;
use rollout_store_sqlite::SqliteStore;
use rollout_store_sqlite::SqliteStoreConfig;

const T0: i64 = 1_700_000_000_000;

fn ring_strategy() -> impl Strategy<Value = Ring> {
    prop_oneof![
        Just(Ring::Lab),
        Just(Ring::Canary),
        Just(Ring::Pilot),
        Just(Ring::Department),
        Just(Ring::Global),
    ]
}

fn intent_strategy() -> impl Strategy<Value = DeploymentIntent> {
    (
        "[a-z][a-z0-9-]{0,15}",
        "[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,3}",
        ring_strategy(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(id, version, ring, completed, privileged)| {
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
                privileged_tooling: privileged,
            };
            let assessment = assess(&profile, &target_scope, &RiskModel::baseline())
                .unwrap_or_else(|err| panic!("fixture assessment failed: {err}"));
            let (status, current_ring) = if completed {
                (IntentStatus::Completed, Some(Ring::Global))
            } else {
                (IntentStatus::RingInProgress { ring }, Some(ring))
            };
            DeploymentIntent {
                intent_id: IntentId::new(&id),
                application_id: ApplicationId::new(format!("app-{id}")),
                adapter_id: AdapterId::new("mdm-east"),
                revision: RevisionNumber::first(),
                artifact: ArtifactReference {
                    artifact_id: ArtifactId::new("pkg-ledgerd"),
                    version,
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
                current_ring,
                status,
                concurrency_override: false,
                created_at: Timestamp::from_unix_millis(T0),
                updated_at: Timestamp::from_unix_millis(T0),
            }
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn snapshots_roundtrip_byte_for_byte(intent in intent_strategy()) {
        let temp = TempDir::new().unwrap();
        let store =
            SqliteStore::open(&SqliteStoreConfig::new(temp.path().join("rollout.sqlite"))).unwrap();
        store.save(&intent).unwrap();
        let loaded = store.load(&intent.intent_id).unwrap().expect("saved intent present");
        prop_assert_eq!(loaded, intent);
    }

    #[test]
    fn tampered_snapshots_always_fail_closed(
        intent in intent_strategy(),
        suffix in "[a-z]{1,12}",
    ) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rollout.sqlite");
        let store = SqliteStore::open(&SqliteStoreConfig::new(&path)).unwrap();
        store.save(&intent).unwrap();

        // Any change to the stored snapshot invalidates its recorded hash.
        let connection = Connection::open(&path).unwrap();
        connection
            .execute(
                "UPDATE intents SET snapshot_json = snapshot_json || ?1 WHERE intent_id = ?2",
                params![suffix, intent.intent_id.as_str()],
            )
            .unwrap();
        drop(connection);

        let error = store.load(&intent.intent_id).unwrap_err();
        prop_assert!(matches!(error, StoreError::Corrupt(_)));
    }
}
