use bridge_provider::{allowed_transitions, validate_transition, ProviderPhase};
use proptest::prelude::*;

fn any_phase() -> impl Strategy<Value = ProviderPhase> {
    prop::sample::select(ProviderPhase::ALL.to_vec())
}

#[test]
fn test_happy_path() {
    let path = [
        ProviderPhase::Idle,
        ProviderPhase::SettingUp,
        ProviderPhase::Connecting,
        ProviderPhase::Connected,
        ProviderPhase::Active,
        ProviderPhase::Connected,
        ProviderPhase::TearingDown,
        ProviderPhase::Closed,
    ];
    for pair in path.windows(2) {
        assert!(validate_transition(pair[0], pair[1]).is_ok(), "{} -> {}", pair[0], pair[1]);
    }
}

#[test]
fn test_reconnecting_transitions() {
    assert!(validate_transition(ProviderPhase::Connected, ProviderPhase::Reconnecting).is_ok());
    assert!(validate_transition(ProviderPhase::Active, ProviderPhase::Reconnecting).is_ok());
    assert!(validate_transition(ProviderPhase::Reconnecting, ProviderPhase::Connected).is_ok());
    assert!(validate_transition(ProviderPhase::Reconnecting, ProviderPhase::Failed).is_ok());

    // Straight back to Active skips re-registration
    assert!(validate_transition(ProviderPhase::Reconnecting, ProviderPhase::Active).is_err());
}

#[test]
fn test_failed_is_reachable_only_while_coming_up() {
    let sources: Vec<_> = ProviderPhase::ALL
        .into_iter()
        .filter(|from| allowed_transitions(*from).contains(&ProviderPhase::Failed))
        .collect();
    assert_eq!(
        sources,
        vec![ProviderPhase::SettingUp, ProviderPhase::Connecting, ProviderPhase::Reconnecting]
    );
}

proptest! {
    #[test]
    fn prop_validate_agrees_with_table(from in any_phase(), to in any_phase()) {
        let res = validate_transition(from, to);
        let allowed = allowed_transitions(from);

        if res.is_ok() {
            prop_assert!(allowed.contains(&to));
        } else {
            prop_assert!(!allowed.contains(&to));
        }
    }

    #[test]
    fn prop_random_walks_never_leave_closed(steps in prop::collection::vec(any_phase(), 1..40)) {
        let mut current = ProviderPhase::Idle;
        for next in steps {
            if validate_transition(current, next).is_ok() {
                prop_assert!(!current.is_terminal());
                current = next;
            }
        }
        if current == ProviderPhase::Closed {
            prop_assert!(allowed_transitions(current).is_empty());
        }
    }

    #[test]
    fn prop_connecting_only_follows_setup(from in any_phase()) {
        if validate_transition(from, ProviderPhase::Connecting).is_ok() {
            prop_assert_eq!(from, ProviderPhase::SettingUp);
        }
    }
}
