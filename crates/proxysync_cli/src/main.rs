//! Command-line walkthrough of the synchronization core.
//!
//! Runs one session against the in-process loopback server: creates a
//! small pipeline, edits it inside undo sets, undoes and redoes the edits,
//! and stores a snapshot. Pass a database path to keep the snapshot on disk.

use log::error;
use proxysync_core::db::{open_db, open_db_in_memory};
use proxysync_core::proxy::property::ProxySlot;
use proxysync_core::{
    default_log_level, init_console_logging, DefinitionRegistry, LoopbackTransport, Session,
    SessionConfig, SnapshotService, SqliteSnapshotRepository, SyncResult, Transport,
};
use std::cell::RefCell;
use std::process::ExitCode;
use std::rc::Rc;

const DEFINITIONS: &str = r#"[
    {
        "group": "sources",
        "name": "SphereSource",
        "properties": [
            {"name": "Radius", "kind": "float64", "command": "SetRadius",
             "default": {"type": "float64", "payload": [0.5]}},
            {"name": "Center", "kind": "float64", "command": "SetCenter",
             "default": {"type": "float64", "payload": [0.0, 0.0, 0.0]}}
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
    }
]"#;

fn main() -> ExitCode {
    if let Err(err) = init_console_logging(default_log_level()) {
        eprintln!("logging disabled: {err}");
    }
    let db_path = std::env::args().nth(1);

    match run(db_path.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(db_path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let registry = Rc::new(DefinitionRegistry::from_json_str(DEFINITIONS)?);
    let loopback = Rc::new(RefCell::new(LoopbackTransport::new(1, registry.clone())));
    let transport: Rc<RefCell<dyn Transport>> = loopback.clone();
    let mut session = Session::new(SessionConfig::default(), transport, registry);

    let (sphere_id, shrink_id) = build_pipeline(&mut session)?;
    println!("created sphere={sphere_id} shrink={shrink_id}");

    session.begin_undo_set("Change radius");
    set_radius(&mut session, sphere_id, 2.5)?;
    session.end_undo_set();
    print_radius(&loopback, sphere_id, "after edit");

    session.undo()?;
    print_radius(&loopback, sphere_id, "after undo");
    session.redo()?;
    print_radius(&loopback, sphere_id, "after redo");

    let conn = match db_path {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };
    let service = SnapshotService::new(SqliteSnapshotRepository::try_new(&conn)?);
    let snapshot = service.save_session(&session, "walkthrough")?;
    for summary in service.list_snapshots()? {
        println!(
            "snapshot {} label={} states={}{}",
            summary.id,
            summary.label,
            summary.state_count,
            if summary.id == snapshot { " (new)" } else { "" }
        );
    }

    for diagnostic in session.take_diagnostics() {
        println!("diagnostic: {diagnostic:?}");
    }
    Ok(())
}

fn build_pipeline(session: &mut Session) -> SyncResult<(u32, u32)> {
    session.begin_undo_set("Create pipeline");
    let sphere = session.create_proxy("sources", "SphereSource")?;
    let shrink = session.create_proxy("filters", "ShrinkFilter")?;
    let sphere_id = sphere.borrow().remote().require_global_id()?;
    let shrink_id = shrink.borrow().remote().require_global_id()?;

    sphere.borrow_mut().update_vtk_objects(session)?;
    shrink
        .borrow_mut()
        .require_property_mut("Input")?
        .add_proxy(ProxySlot::new(sphere_id, 0))?;
    shrink.borrow_mut().update_vtk_objects(session)?;
    session.end_undo_set();
    Ok((sphere_id, shrink_id))
}

fn set_radius(session: &mut Session, sphere_id: u32, radius: f64) -> SyncResult<()> {
    let Some(sphere) = session.proxy(sphere_id) else {
        return Ok(());
    };
    sphere
        .borrow_mut()
        .require_property_mut("Radius")?
        .set_elements(&[radius])?;
    let result = sphere.borrow_mut().update_vtk_objects(session);
    result
}

fn print_radius(loopback: &RefCell<LoopbackTransport>, sphere_id: u32, stage: &str) {
    match loopback.borrow().backing_value(sphere_id, "SetRadius") {
        Some(value) => println!("{stage}: server radius {value:?}"),
        None => println!("{stage}: server radius untouched"),
    }
}
