//! Property-Based Tests for Quota Resolution
//!
//! Invariants checked over random inputs:
//!
//! - **Windows**: every instant lies inside exactly one window, and reset
//!   boundaries are aligned window starts
//! - **Limits**: consumption never passes a finite limit and never decreases
//!   within a window
//! - **Precedence**: the winning source is the highest applicable layer that
//!   has a definition
//!
//! # Running the Tests
//!
//! ```bash
//! cargo test --lib quota::proptests
//! ```

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::quota::period::ResetPeriod;
use crate::quota::registry::FeatureSpec;
use crate::quota::service::QuotaService;
use crate::quota::tracker::{GuestDefaultRequest, OverrideRequest, PlanAssignmentRequest};
use crate::quota::types::{PlanFeature, PlanStatus, QuotaLimit, QuotaSource, Subject, SubscriptionPlan};
use crate::quota::{AdminContext, ManualClock, MemoryStore, ServiceOptions};

fn arb_period() -> impl Strategy<Value = ResetPeriod> {
    prop_oneof![
        Just(ResetPeriod::None),
        Just(ResetPeriod::Hourly),
        Just(ResetPeriod::Daily),
        Just(ResetPeriod::Weekly),
        Just(ResetPeriod::Monthly),
    ]
}

// 2000-01-01 .. 2100-01-01
fn arb_instant() -> impl Strategy<Value = DateTime<Utc>> {
    (946_684_800i64..4_102_444_800i64).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn service(limit: QuotaLimit) -> QuotaService {
    let registry = crate::quota::FeatureRegistry::from_specs(vec![FeatureSpec::new(
        "feature",
        limit,
        ResetPeriod::Daily,
    )])
    .unwrap();
    QuotaService::new(
        registry,
        Arc::new(MemoryStore::new()),
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap())),
        Arc::new(crate::metrics::QuotaMetrics::new().unwrap()),
        ServiceOptions::default(),
    )
}

proptest! {
    /// An instant lies in the window that starts at window_start and ends at next_reset
    #[test]
    fn prop_instant_within_its_window(period in arb_period(), at in arb_instant()) {
        let start = period.window_start(at);
        prop_assert!(start <= at);

        if let Some(reset_at) = period.next_reset(at) {
            prop_assert!(reset_at > at);
            prop_assert_eq!(period.window_start(reset_at), reset_at);
            prop_assert!(!period.has_elapsed(at, reset_at - chrono::Duration::seconds(1)));
            prop_assert!(period.has_elapsed(at, reset_at));
        } else {
            prop_assert!(!period.has_elapsed(at, at + chrono::Duration::days(3650)));
        }
    }

    /// allows() agrees with checked arithmetic against the limit
    #[test]
    fn prop_limit_allows_matches_arithmetic(limit in 0u64..1000, consumed in 0u64..1200, amount in 1u64..500) {
        let quota = QuotaLimit::Limited(limit);
        prop_assert_eq!(quota.allows(consumed, amount), consumed + amount <= limit);
        prop_assert_eq!(quota.remaining(consumed), Some(limit.saturating_sub(consumed)));
        prop_assert!(QuotaLimit::Unlimited.allows(consumed, amount));
    }

    /// Consumption grows monotonically, never exceeds the limit, and matches a greedy model
    #[test]
    fn prop_consumption_monotonic_and_bounded(
        limit in 0u64..50,
        amounts in prop::collection::vec(1u64..10, 1..40)
    ) {
        let rt = runtime();
        let service = service(QuotaLimit::Limited(limit));
        let subject = Subject::user("p");

        let mut model = 0u64;
        let mut last = 0u64;
        for amount in amounts {
            let result = rt
                .block_on(service.tracker().try_consume(&subject, "feature", amount))
                .unwrap();

            let expected = model + amount <= limit;
            prop_assert_eq!(result.allowed, expected);
            if expected {
                model += amount;
            }

            prop_assert!(result.consumed >= last);
            prop_assert!(result.consumed <= limit);
            prop_assert_eq!(result.consumed, model);
            prop_assert_eq!(result.remaining, Some(limit - model));
            last = result.consumed;
        }
    }

    /// The winning source is the first applicable layer with a definition
    #[test]
    fn prop_precedence_order(
        is_guest in any::<bool>(),
        has_override in any::<bool>(),
        has_plan in any::<bool>(),
        has_guest_default in any::<bool>()
    ) {
        let rt = runtime();
        let service = service(QuotaLimit::Limited(1));
        let subject = if is_guest { Subject::guest("s") } else { Subject::user("s") };

        let quota = rt.block_on(async {
            let tracker = service.tracker();
            if has_override {
                tracker
                    .set_override(&subject, "feature", OverrideRequest::new(QuotaLimit::Limited(40), ResetPeriod::Daily))
                    .await
                    .unwrap();
            }
            if has_plan {
                let mut features = HashMap::new();
                features.insert(
                    "feature".to_string(),
                    PlanFeature { limit: Some(QuotaLimit::Limited(30)), period: ResetPeriod::Daily },
                );
                service
                    .seed(Vec::new(), vec![SubscriptionPlan { name: "pro".to_string(), sort_order: 0, features }])
                    .await
                    .unwrap();
                tracker
                    .assign_plan("s", PlanAssignmentRequest {
                        plan: "pro".to_string(),
                        status: PlanStatus::Active,
                        expires_at: None,
                        context: AdminContext::default(),
                    })
                    .await
                    .unwrap();
            }
            if has_guest_default {
                tracker
                    .set_guest_default("feature", GuestDefaultRequest {
                        limit: QuotaLimit::Limited(20),
                        period: ResetPeriod::Daily,
                        description: None,
                        active: true,
                        context: AdminContext::default(),
                    })
                    .await
                    .unwrap();
            }
            service.resolver().resolve(&subject, "feature").await.unwrap()
        });

        let expected = if has_override {
            QuotaSource::UserOverride
        } else if has_plan && !is_guest {
            QuotaSource::SubscriptionPlan
        } else if has_guest_default && is_guest {
            QuotaSource::GlobalGuestDefault
        } else {
            QuotaSource::SystemDefault
        };
        prop_assert_eq!(quota.source, expected);
    }
}
