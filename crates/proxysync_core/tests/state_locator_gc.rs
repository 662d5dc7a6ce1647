mod common;

use common::{create, fixture, fixture_with, set_f64, Fixture};
use proxysync_core::{Deserializer, GlobalId, SessionConfig};
use std::rc::Rc;

fn shallow_undo() -> SessionConfig {
    SessionConfig {
        undo_depth: 2,
        ..SessionConfig::default()
    }
}

/// Two spheres and two recorded radius edits on the second one.
fn two_edits(fx: &mut Fixture) -> (GlobalId, GlobalId) {
    let (_, doomed_id) = create(&mut fx.session, "sources", "SphereSource");
    let (kept, kept_id) = create(&mut fx.session, "sources", "SphereSource");
    for (label, radius) in [("first", 1.0), ("second", 2.0)] {
        fx.session.begin_undo_set(label);
        set_f64(&mut fx.session, &kept, "Radius", &[radius]);
        assert!(fx.session.end_undo_set());
    }
    (doomed_id, kept_id)
}

#[test]
fn unregistered_state_survives_depth_pops_and_is_evicted_on_the_next() {
    let mut fx = fixture_with(shallow_undo(), 1);
    let (doomed_id, _) = two_edits(&mut fx);

    fx.session.unregister_proxy(doomed_id).unwrap();
    assert_eq!(fx.session.state_locator().pending_ttl(doomed_id), Some(2));

    fx.session.undo().unwrap();
    fx.session.undo().unwrap();
    assert!(fx.session.state_locator().contains(doomed_id));
    assert_eq!(fx.session.state_locator().pending_ttl(doomed_id), Some(0));

    fx.session.redo().unwrap();
    assert!(fx.session.state_locator().contains(doomed_id));

    fx.session.undo().unwrap();
    assert!(!fx.session.state_locator().contains(doomed_id));
    assert!(fx
        .session
        .state_locator_mut()
        .find_state(doomed_id, true)
        .is_none());
}

#[test]
fn countdown_follows_the_current_undo_depth_not_the_limit() {
    let mut fx = fixture();
    let (doomed_id, _) = two_edits(&mut fx);
    assert_eq!(fx.session.undo_stack().max_depth(), 64);

    fx.session.unregister_proxy(doomed_id).unwrap();
    assert_eq!(fx.session.state_locator().pending_ttl(doomed_id), Some(2));

    fx.session.undo().unwrap();
    fx.session.undo().unwrap();
    fx.session.redo().unwrap();
    assert!(fx.session.state_locator().contains(doomed_id));

    fx.session.undo().unwrap();
    assert!(!fx.session.state_locator().contains(doomed_id));
}

#[test]
fn undone_creation_keeps_its_state_for_every_remaining_undo() {
    let mut fx = fixture();
    let (kept, _) = create(&mut fx.session, "sources", "SphereSource");
    fx.session.begin_undo_set("Radius");
    set_f64(&mut fx.session, &kept, "Radius", &[1.5]);
    assert!(fx.session.end_undo_set());
    fx.session.begin_undo_set("Create sphere");
    let (_, created_id) = create(&mut fx.session, "sources", "SphereSource");
    assert!(fx.session.end_undo_set());

    fx.session.undo().unwrap();
    assert!(fx.session.proxy(created_id).is_none());
    assert_eq!(fx.session.state_locator().pending_ttl(created_id), Some(1));

    fx.session.undo().unwrap();
    fx.session.redo().unwrap();
    assert!(fx.session.state_locator().contains(created_id));

    fx.session.undo().unwrap();
    assert!(!fx.session.state_locator().contains(created_id));
}

#[test]
fn re_registration_cancels_the_countdown() {
    let mut fx = fixture_with(shallow_undo(), 1);
    let (doomed_id, _) = two_edits(&mut fx);
    fx.session.unregister_proxy(doomed_id).unwrap();

    let mut locator = fx.session.new_locator(Some(Rc::new(Deserializer::new())));
    assert!(locator.locate_proxy(doomed_id, &mut fx.session).is_some());
    assert_eq!(fx.session.state_locator().pending_ttl(doomed_id), None);

    for _ in 0..2 {
        fx.session.undo().unwrap();
    }
    fx.session.redo().unwrap();
    fx.session.undo().unwrap();
    assert!(fx.session.state_locator().contains(doomed_id));
}

#[test]
fn clearing_undo_history_evicts_every_tracked_state() {
    let mut fx = fixture_with(shallow_undo(), 1);
    let (doomed_id, kept_id) = two_edits(&mut fx);
    fx.session.unregister_proxy(doomed_id).unwrap();

    fx.session.clear_undo_stack();

    assert!(!fx.session.state_locator().contains(doomed_id));
    assert!(fx.session.state_locator().contains(kept_id));
    assert!(!fx.session.can_undo());
}

#[test]
fn without_undo_states_are_never_collected() {
    let config = SessionConfig {
        undo_enabled: false,
        ..SessionConfig::default()
    };
    let mut fx = fixture_with(config, 1);
    let (_, sphere_id) = create(&mut fx.session, "sources", "SphereSource");

    fx.session.unregister_proxy(sphere_id).unwrap();
    fx.session.clear_undo_stack();

    assert!(!fx.session.state_locator().is_undo_stack_attached());
    assert!(fx.session.state_locator().contains(sphere_id));
}
