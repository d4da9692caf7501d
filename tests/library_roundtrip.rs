// tests/library_roundtrip.rs
//
// End-to-end: rack on the in-memory engine, library on disk, project settings.

use std::fs;
use std::sync::mpsc;

use caustk::error::LibraryError;
use caustk::state::{EffectType, MachineType, auto_wah};
use caustk::{
    Codec, Library, MachineNode, Node, NodeEvent, NodeKind, ProjectManager, RackNode,
    RackSession, RuntimeConfig, VirtualRack,
};

fn session() -> RackSession {
    RackSession::new(Box::new(VirtualRack::new()), Codec::standard().unwrap())
}

#[test]
fn test_machine_survives_library_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig::with_root(dir.path());
    let codec = Codec::standard().unwrap();

    let mut session = session();
    session.create_rack().unwrap();
    session
        .with_rack(|rack, cx| {
            rack.create_machine(cx, 0, MachineType::SubSynth, "bass")?
                .effects_mut()
                .create_effect(cx, 0, EffectType::AutoWah)?
                .set(cx, auto_wah::CUTOFF, 1.5)
        })
        .unwrap();

    let mut library = Library::create(&config, "main", codec.clone()).unwrap();
    let original = session.rack().machine(0).unwrap();
    assert!(library.add(original).unwrap());

    let info = library.get(original.id()).unwrap().clone();
    assert_eq!(info.kind, NodeKind::Machine);
    let loaded: MachineNode = library.new_instance(&info).unwrap();

    assert_eq!(loaded.index(), 0);
    assert_eq!(loaded.name(), "bass");
    assert_eq!(loaded.machine_type(), MachineType::SubSynth);
    assert!(!loaded.base().is_live());
    let original_params = original.effects().effect(0).unwrap().params().clone();
    let loaded_effect = loaded.effects().effect(0).unwrap();
    assert_eq!(loaded_effect.params(), &original_params);
    assert_eq!(loaded_effect.get(auto_wah::CUTOFF), Some(1.5));

    // The loaded machine drops into a fresh rack and goes live there.
    session.set_rack(RackNode::new()).unwrap();
    session.drain_events();
    session
        .with_rack(|rack, cx| rack.add_machine(cx, loaded).map(|_| ()))
        .unwrap();
    assert!(session.rack().machine(0).unwrap().base().is_live());
    assert_eq!(
        session.drain_events()[0],
        NodeEvent::MachineCreated {
            index: 0,
            machine_type: MachineType::SubSynth,
            name: "bass".into(),
        }
    );
}

#[test]
fn test_library_reopens_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig::with_root(dir.path());
    let codec = Codec::standard().unwrap();

    let machine = MachineNode::new(3, MachineType::BeatBox, "drums");
    let mut library = Library::create(&config, "kit", codec.clone()).unwrap();
    library.add(&machine).unwrap();
    let path = library
        .archive_path(library.get(machine.id()).unwrap())
        .unwrap();
    drop(library);

    let mut library = Library::open(&config, "kit", codec).unwrap();
    assert!(library.contains(&machine));
    assert!(path.is_file());

    assert!(library.remove(&machine).unwrap());
    assert!(!path.exists());
    assert!(library.is_empty());
}

#[test]
fn test_open_missing_library() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig::with_root(dir.path());
    assert!(matches!(
        Library::open(&config, "nothing", Codec::standard().unwrap()),
        Err(LibraryError::NotFound(_))
    ));
}

#[test]
fn test_settings_created_on_first_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig::with_root(dir.path());
    let settings = config.settings_file();
    assert!(!settings.exists());

    let (tx, _rx) = mpsc::channel();
    let mut manager = ProjectManager::new(config, tx);
    manager.initialize().unwrap();

    assert!(settings.is_file());
    let text = fs::read_to_string(&settings).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert!(parsed.is_object());
}

#[test]
fn test_project_holds_rack() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, _rx) = mpsc::channel();
    let mut manager = ProjectManager::new(RuntimeConfig::with_root(dir.path()), tx);
    manager.initialize().unwrap();
    manager.create_project("set").unwrap();

    let mut session = session();
    session.create_rack().unwrap();
    session
        .with_rack(|rack, cx| {
            rack.create_machine(cx, 5, MachineType::PcmSynth, "keys")
                .map(|_| ())
        })
        .unwrap();
    manager.save_rack(session.codec(), session.rack()).unwrap();

    let rack = manager.load_rack(session.codec()).unwrap();
    assert_eq!(rack.machine(5).unwrap().name(), "keys");

    let mut other = self::session();
    other.set_rack(rack).unwrap();
    assert!(other.rack().machine(5).unwrap().base().is_live());
}
