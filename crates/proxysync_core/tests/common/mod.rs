#![allow(dead_code)]

use proxysync_core::proxy::property::ProxySlot;
use proxysync_core::{
    DefinitionRegistry, GlobalId, LoopbackTransport, ProxyHandle, Session, SessionConfig,
    Transport,
};
use std::cell::RefCell;
use std::rc::Rc;

pub const DEFINITIONS: &str = r#"[
    {
        "group": "sources",
        "name": "SphereSource",
        "properties": [
            {"name": "Radius", "kind": "float64", "command": "SetRadius",
             "default": {"type": "float64", "payload": [0.5]}},
            {"name": "Center", "kind": "float64", "command": "SetCenter",
             "default": {"type": "float64", "payload": [0.0, 0.0, 0.0]}},
            {"name": "Bounds", "kind": "float64", "command": "GetBounds",
             "information_only": true}
        ]
    },
    {
        "group": "filters",
        "name": "ShrinkFilter",
        "properties": [
            {"name": "Input", "kind": "proxy", "command": "SetInputConnection"},
            {"name": "ShrinkFactor", "kind": "float64", "command": "SetShrinkFactor",
             "default": {"type": "float64", "payload": [0.5]}}
        ]
    },
    {
        "group": "representations",
        "name": "Actor",
        "properties": [
            {"name": "Opacity", "kind": "float64", "command": "SetOpacity",
             "default": {"type": "float64", "payload": [1.0]}}
        ]
    },
    {
        "group": "representations",
        "name": "GeometryRepresentation",
        "properties": [
            {"name": "Input", "kind": "proxy", "command": "SetInputConnection"},
            {"name": "Visibility", "kind": "int", "command": "SetVisibility",
             "default": {"type": "int", "payload": [1]}}
        ],
        "sub_proxies": [
            {"name": "Actor", "group": "representations", "proxy": "Actor"}
        ]
    },
    {
        "group": "views",
        "name": "RenderView",
        "location": 5,
        "properties": [
            {"name": "CameraPosition", "kind": "float64", "command": "SetCameraPosition",
             "default": {"type": "float64", "payload": [0.0, 0.0, 1.0]}}
        ]
    }
]"#;

pub struct Fixture {
    pub session: Session,
    pub loopback: Rc<RefCell<LoopbackTransport>>,
    pub registry: Rc<DefinitionRegistry>,
}

pub fn fixture() -> Fixture {
    fixture_with(SessionConfig::default(), 1)
}

pub fn fixture_with(config: SessionConfig, client_id: u32) -> Fixture {
    let registry = Rc::new(DefinitionRegistry::from_json_str(DEFINITIONS).unwrap());
    let loopback = Rc::new(RefCell::new(LoopbackTransport::new(
        client_id,
        registry.clone(),
    )));
    let transport: Rc<RefCell<dyn Transport>> = loopback.clone();
    let session = Session::new(config, transport, registry.clone());
    Fixture {
        session,
        loopback,
        registry,
    }
}

/// Creates, registers, and materializes one proxy.
pub fn create(session: &mut Session, group: &str, name: &str) -> (ProxyHandle, GlobalId) {
    let proxy = session.create_proxy(group, name).unwrap();
    proxy.borrow_mut().update_vtk_objects(session).unwrap();
    let global_id = proxy.borrow().global_id().unwrap();
    (proxy, global_id)
}

pub fn set_f64(session: &mut Session, proxy: &ProxyHandle, property: &str, values: &[f64]) {
    proxy
        .borrow_mut()
        .require_property_mut(property)
        .unwrap()
        .set_elements(values)
        .unwrap();
    proxy.borrow_mut().update_vtk_objects(session).unwrap();
}

pub fn connect(session: &mut Session, consumer: &ProxyHandle, producer: GlobalId) {
    consumer
        .borrow_mut()
        .require_property_mut("Input")
        .unwrap()
        .add_proxy(ProxySlot::new(producer, 0))
        .unwrap();
    consumer.borrow_mut().update_vtk_objects(session).unwrap();
}

pub fn f64_values(proxy: &ProxyHandle, property: &str) -> Vec<f64> {
    proxy
        .borrow()
        .property(property)
        .unwrap()
        .elements::<f64>()
        .unwrap()
        .to_vec()
}
