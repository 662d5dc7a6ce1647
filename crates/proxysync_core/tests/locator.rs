mod common;

use common::{create, f64_values, fixture, set_f64};
use proxysync_core::model::message::SubProxyEntry;
use proxysync_core::proxy::property::ProxySlot;
use proxysync_core::session::diagnostics::Diagnostic;
use proxysync_core::{Deserializer, GlobalId, Location, Message, Variant};
use std::rc::Rc;

fn typed_state(global_id: GlobalId, group: &str, name: &str) -> Message {
    let mut msg = Message::new(global_id, Location::DATA_SERVER);
    msg.extensions.xml_group = Some(group.to_string());
    msg.extensions.xml_name = Some(name.to_string());
    msg
}

fn sphere_state(global_id: GlobalId, radius: f64) -> Message {
    let mut msg = typed_state(global_id, "sources", "SphereSource");
    msg.push_property("Radius", Variant::Float64(vec![radius]));
    msg
}

fn shrink_state(global_id: GlobalId, inputs: &[GlobalId]) -> Message {
    let mut msg = typed_state(global_id, "filters", "ShrinkFilter");
    msg.push_property(
        "Input",
        Variant::Proxy {
            global_ids: inputs.to_vec(),
            ports: vec![0; inputs.len()],
        },
    );
    msg
}

fn element_locator(
    session: &proxysync_core::Session,
    elements: Vec<Message>,
) -> proxysync_core::ProxyLocator {
    let deserializer = Deserializer::from_elements(elements).with_state_locator(false);
    session.new_locator(Some(Rc::new(deserializer)))
}

#[test]
fn located_proxy_is_cached_and_registered_once() {
    let mut fx = fixture();
    let (sphere, sphere_id) = create(&mut fx.session, "sources", "SphereSource");
    set_f64(&mut fx.session, &sphere, "Radius", &[1.5]);
    fx.session.unregister_proxy(sphere_id).unwrap();
    drop(sphere);

    let mut locator = fx.session.new_locator(Some(Rc::new(Deserializer::new())));
    let first = locator.locate_proxy(sphere_id, &mut fx.session).unwrap();
    let second = locator.locate_proxy(sphere_id, &mut fx.session).unwrap();

    assert!(Rc::ptr_eq(&first, &second));
    assert!(Rc::ptr_eq(&first, &fx.session.proxy(sphere_id).unwrap()));
    assert_eq!(f64_values(&first, "Radius"), vec![1.5]);
    assert!(fx.loopback.borrow().has_object(sphere_id));
}

#[test]
fn registered_proxies_are_returned_without_deserializing() {
    let mut fx = fixture();
    let (sphere, sphere_id) = create(&mut fx.session, "sources", "SphereSource");

    let mut locator = fx.session.new_locator(None);
    let located = locator.locate_proxy(sphere_id, &mut fx.session).unwrap();

    assert!(Rc::ptr_eq(&located, &sphere));
    assert!(locator.locate_proxy(0, &mut fx.session).is_none());
}

#[test]
fn missing_definition_returns_none_and_registers_nothing() {
    let mut fx = fixture();
    let mut locator = element_locator(&fx.session, Vec::new());

    assert!(locator.locate_proxy(999, &mut fx.session).is_none());
    assert!(fx.session.registered_ids().is_empty());
}

#[test]
fn unknown_stored_type_returns_none_and_registers_nothing() {
    let mut fx = fixture();
    let mut locator = element_locator(&fx.session, vec![typed_state(40, "sources", "Missing")]);

    assert!(locator.locate_proxy(40, &mut fx.session).is_none());
    assert!(fx.session.registered_ids().is_empty());
    assert!(!locator.is_cached(40));
}

#[test]
fn referenced_producers_are_created_with_the_consumer() {
    let mut fx = fixture();
    let mut locator = element_locator(
        &fx.session,
        vec![sphere_state(50, 4.0), shrink_state(51, &[50])],
    );

    let shrink = locator.locate_proxy(51, &mut fx.session).unwrap();

    let sphere = fx.session.proxy(50).unwrap();
    assert_eq!(f64_values(&sphere, "Radius"), vec![4.0]);
    assert_eq!(
        shrink.borrow().property("Input").unwrap().proxies().unwrap(),
        &[ProxySlot::new(50, 0)]
    );
    assert_eq!(fx.session.relations().consumers_of(50), vec![51]);
    let loopback = fx.loopback.borrow();
    assert!(loopback.has_object(50));
    assert!(loopback.has_object(51));
}

#[test]
fn cyclic_references_resolve_in_two_phases() {
    let mut fx = fixture();
    let mut locator = element_locator(
        &fx.session,
        vec![shrink_state(60, &[61]), shrink_state(61, &[60])],
    );

    let first = locator.locate_proxy(60, &mut fx.session).unwrap();
    let second = fx.session.proxy(61).unwrap();

    assert_eq!(
        first.borrow().property("Input").unwrap().proxies().unwrap(),
        &[ProxySlot::new(61, 0)]
    );
    assert_eq!(
        second.borrow().property("Input").unwrap().proxies().unwrap(),
        &[ProxySlot::new(60, 0)]
    );
    assert!(fx.session.take_diagnostics().is_empty());
}

#[test]
fn unresolvable_references_are_dropped_and_reported() {
    let mut fx = fixture();
    let mut locator = element_locator(&fx.session, vec![shrink_state(51, &[77])]);

    let shrink = locator.locate_proxy(51, &mut fx.session).unwrap();

    assert!(shrink
        .borrow()
        .property("Input")
        .unwrap()
        .proxies()
        .unwrap()
        .is_empty());
    let diagnostics = fx.session.take_diagnostics();
    assert!(diagnostics.contains(&Diagnostic::DroppedReference {
        owner: 51,
        property: "Input".to_string(),
        reference: 77,
    }));
}

fn corrupt_sphere_state(global_id: GlobalId) -> Message {
    let mut msg = typed_state(global_id, "sources", "SphereSource");
    msg.push_property("Radius", Variant::Int(vec![3]));
    msg
}

#[test]
fn state_that_fails_to_load_leaves_nothing_registered() {
    let mut fx = fixture();
    let mut locator = element_locator(&fx.session, vec![corrupt_sphere_state(77)]);

    assert!(locator.locate_proxy(77, &mut fx.session).is_none());

    assert!(fx.session.registered_ids().is_empty());
    assert!(!locator.is_cached(77));
    assert!(!fx.loopback.borrow().has_object(77));
    assert!(matches!(
        fx.session.take_diagnostics().as_slice(),
        [Diagnostic::DeserializationFailed { global_id: 77, .. }]
    ));
    assert!(locator.locate_proxy(77, &mut fx.session).is_none());
}

#[test]
fn consumer_of_a_failed_producer_drops_the_reference() {
    let mut fx = fixture();
    let mut locator = element_locator(
        &fx.session,
        vec![corrupt_sphere_state(50), shrink_state(51, &[50])],
    );

    let shrink = locator.locate_proxy(51, &mut fx.session).unwrap();

    assert_eq!(fx.session.registered_ids(), vec![51]);
    assert!(shrink.borrow().is_materialized());
    assert!(shrink
        .borrow()
        .property("Input")
        .unwrap()
        .proxies()
        .unwrap()
        .is_empty());
    let diagnostics = fx.session.take_diagnostics();
    assert!(diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::DeserializationFailed { global_id: 50, .. })));
    assert!(diagnostics.contains(&Diagnostic::DroppedReference {
        owner: 51,
        property: "Input".to_string(),
        reference: 50,
    }));
}

#[test]
fn sub_proxies_keep_their_recorded_ids() {
    let mut fx = fixture();
    let mut repr = typed_state(90, "representations", "GeometryRepresentation");
    repr.extensions.sub_proxies.push(SubProxyEntry {
        name: "Actor".to_string(),
        global_id: 91,
    });
    let mut actor = typed_state(91, "representations", "Actor");
    actor.extensions.xml_sub_proxy_name = Some("Actor".to_string());
    actor.push_property("Opacity", Variant::Float64(vec![0.25]));

    let mut locator = element_locator(&fx.session, vec![repr, actor]);
    let located = locator.locate_proxy(90, &mut fx.session).unwrap();

    let sub = located.borrow().sub_proxy("Actor").unwrap();
    assert_eq!(sub.borrow().global_id(), Some(91));
    assert!(Rc::ptr_eq(&sub, &fx.session.proxy(91).unwrap()));
    assert_eq!(f64_values(&sub, "Opacity"), vec![0.25]);
}

#[test]
fn id_conflict_during_restore_leaves_nothing_registered() {
    let mut fx = fixture();
    let (_, sphere_id) = create(&mut fx.session, "sources", "SphereSource");
    let mut repr = typed_state(90, "representations", "GeometryRepresentation");
    repr.extensions.sub_proxies.push(SubProxyEntry {
        name: "Actor".to_string(),
        global_id: sphere_id,
    });

    let mut locator = element_locator(&fx.session, vec![repr]);

    assert!(locator.locate_proxy(90, &mut fx.session).is_none());
    assert_eq!(fx.session.registered_ids(), vec![sphere_id]);
}

#[test]
fn assigned_proxy_overrides_creation() {
    let mut fx = fixture();
    let (sphere, _) = create(&mut fx.session, "sources", "SphereSource");
    let mut locator = element_locator(&fx.session, vec![sphere_state(70, 9.0)]);

    locator.assign_proxy(70, sphere.clone());
    let located = locator.locate_proxy(70, &mut fx.session).unwrap();

    assert!(Rc::ptr_eq(&located, &sphere));
    assert!(fx.session.proxy(70).is_none());
}
