//! Property-based tests for the `pair` module.
//!
//! Verifies the exchange-pair policy invariants:
//! - the Unknown sentinel never reaches a caller subscriber, whatever the
//!   write interleaving
//! - under the default policy the subscriber sees at most one value, ever,
//!   and the slot is freed the moment it is delivered
//! - excluded states surface without freeing the slot
//! - init flags decide whether establish populates or merely reserves slots
//! - PairOptions serde roundtrip

use backchannel::item::State;
use backchannel::pair::{ExchangePair, PairOptions};
use backchannel::registry::ArchiveRegistry;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

const CALLER: &str = "caller";
const CALLEE: &str = "callee";
const REQUEST: &str = "req-1";

// =========================================================================
// Strategies
// =========================================================================

/// Non-sentinel states only (codes never collide with Unknown's -1).
fn arb_real_state() -> impl Strategy<Value = State> {
    (0i32..=6, prop::option::of("[a-z]{0,8}")).prop_map(|(code, message)| match message {
        Some(message) => State::with_message(code, message),
        None => State::new(code),
    })
}

/// A write schedule: `None` writes the Unknown sentinel, `Some` a real state.
fn arb_schedule() -> impl Strategy<Value = Vec<Option<State>>> {
    prop::collection::vec(prop::option::of(arb_real_state()), 0..=10)
}

fn arb_options() -> impl Strategy<Value = PairOptions> {
    (
        prop::option::of(Just(State::UNKNOWN)),
        prop::option::of(Just(State::UNKNOWN)),
        any::<bool>(),
        prop::collection::vec(arb_real_state(), 0..=3),
    )
        .prop_map(
            |(init_caller_state, init_callee_state, auto_remove, exclude_from_auto_remove)| {
                PairOptions {
                    init_caller_state,
                    init_callee_state,
                    auto_remove,
                    exclude_from_auto_remove,
                }
            },
        )
}

fn apply_schedule(registry: &ArchiveRegistry, schedule: &[Option<State>]) {
    for write in schedule {
        match write {
            Some(state) => registry.save_item(CALLER, REQUEST, state.clone(), None),
            None => registry.reset_item(CALLER, REQUEST),
        }
        .unwrap();
    }
}

fn subscribed_pair(registry: &ArchiveRegistry, options: PairOptions) -> Arc<Mutex<Vec<State>>> {
    let pair = ExchangePair::establish(registry, REQUEST, CALLER, CALLEE, options).unwrap();
    let seen: Arc<Mutex<Vec<State>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        pair.subscribe_caller(move |item| seen.lock().push(item.state.clone()));
    }
    seen
}

// =========================================================================
// Unknown filtering
// =========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// With auto-removal off, the subscriber sees exactly the real states in
    /// write order; sentinel writes vanish.
    #[test]
    fn prop_unknown_never_surfaces(schedule in arb_schedule()) {
        let registry = ArchiveRegistry::new();
        let options = PairOptions { auto_remove: false, ..PairOptions::default() };
        let seen = subscribed_pair(&registry, options);

        apply_schedule(&registry, &schedule);

        let expected: Vec<State> = schedule.into_iter().flatten().collect();
        prop_assert_eq!(&*seen.lock(), &expected);
    }
}

// =========================================================================
// One-shot policy
// =========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Under the default policy at most one value is ever delivered, no
    /// matter how many writes follow; the slot is gone once it is.
    #[test]
    fn prop_default_policy_is_one_shot(schedule in arb_schedule()) {
        let registry = ArchiveRegistry::new();
        let seen = subscribed_pair(&registry, PairOptions::default());

        apply_schedule(&registry, &schedule);

        let first_real = schedule.into_iter().flatten().next();
        match first_real {
            Some(state) => prop_assert_eq!(&*seen.lock(), &[state]),
            None => prop_assert!(seen.lock().is_empty()),
        }
    }

    /// Excluded states surface without consuming the exchange; the first
    /// non-excluded real state still does.
    #[test]
    fn prop_excluded_states_defer_removal(
        excluded_runs in 0usize..=4,
        terminal in arb_real_state(),
    ) {
        prop_assume!(terminal != State::FAILED);

        let registry = ArchiveRegistry::new();
        let options = PairOptions {
            exclude_from_auto_remove: vec![State::FAILED],
            ..PairOptions::default()
        };
        let seen = subscribed_pair(&registry, options);

        for _ in 0..excluded_runs {
            registry.save_item(CALLER, REQUEST, State::FAILED, None).unwrap();
        }
        let caller = registry.archive(CALLER).unwrap();
        prop_assert!(caller.archive().has_item_channel(REQUEST));

        registry.save_item(CALLER, REQUEST, terminal.clone(), None).unwrap();
        prop_assert!(!caller.archive().has_item_channel(REQUEST));

        let mut expected = vec![State::FAILED; excluded_runs];
        expected.push(terminal);
        prop_assert_eq!(&*seen.lock(), &expected);
    }
}

// =========================================================================
// Establishment options
// =========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Init flags decide between a populated slot and a bare reservation.
    #[test]
    fn prop_init_flags_control_population(options in arb_options()) {
        let registry = ArchiveRegistry::new();
        let expect_caller = options.init_caller_state.is_some();
        let expect_callee = options.init_callee_state.is_some();
        ExchangePair::establish(&registry, REQUEST, CALLER, CALLEE, options).unwrap();

        let caller = registry.archive(CALLER).unwrap();
        let callee = registry.archive(CALLEE).unwrap();
        prop_assert!(caller.archive().has_item_channel(REQUEST));
        prop_assert!(callee.archive().has_item_channel(REQUEST));
        prop_assert_eq!(caller.archive().has_item(REQUEST), expect_caller);
        prop_assert_eq!(callee.archive().has_item(REQUEST), expect_callee);
    }

    /// Callee-direction writes never disturb the caller's slot.
    #[test]
    fn prop_callee_writes_are_isolated(states in prop::collection::vec(arb_real_state(), 1..=6)) {
        let registry = ArchiveRegistry::new();
        let pair = ExchangePair::establish(
            &registry,
            REQUEST,
            CALLER,
            CALLEE,
            PairOptions::default(),
        )
        .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            pair.subscribe_caller(move |item| seen.lock().push(item.state.clone()));
        }

        for state in &states {
            pair.write_callee(state.clone(), None).unwrap();
        }

        prop_assert!(seen.lock().is_empty(), "caller saw callee traffic");
        let callee = registry.archive(CALLEE).unwrap();
        prop_assert_eq!(&callee.archive().find_item(REQUEST).unwrap().state, states.last().unwrap());
        let caller = registry.archive(CALLER).unwrap();
        prop_assert!(caller.archive().is_item_unknown_or_absent(REQUEST));
    }

    /// PairOptions JSON roundtrip.
    #[test]
    fn prop_options_serde_roundtrip(options in arb_options()) {
        let json = serde_json::to_string(&options).unwrap();
        let back: PairOptions = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, options);
    }
}

// =========================================================================
// Unit tests
// =========================================================================

#[test]
fn options_default_is_the_one_shot_unknown_init() {
    let options = PairOptions::default();
    assert_eq!(options.init_caller_state, Some(State::UNKNOWN));
    assert_eq!(options.init_callee_state, Some(State::UNKNOWN));
    assert!(options.auto_remove);
    assert!(options.exclude_from_auto_remove.is_empty());
}

#[test]
fn options_deserialize_fills_missing_fields_from_default() {
    let options: PairOptions = serde_json::from_str(r#"{"auto_remove": false}"#).unwrap();
    assert!(!options.auto_remove);
    assert_eq!(options.init_caller_state, Some(State::UNKNOWN));
}
