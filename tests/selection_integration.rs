use lamco_selection::transport::{Connection, Property, SelectionEvent, CURRENT_TIME, NONE};
use lamco_selection::{
    Clipboard, ContentMap, LocalDisplay, Payload, SelectionConfig, SelectionError, SelectionKind,
    SelectionManagerStub, SelectionService, SelectionValue, TransportError,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn service(display: &LocalDisplay, name: &str, kind: SelectionKind) -> SelectionService {
    let config = SelectionConfig {
        client_name: name.to_string(),
        ..SelectionConfig::default()
    };
    SelectionService::new(Arc::new(display.clone()), kind, config).unwrap()
}

fn clipboard(display: &LocalDisplay, name: &str) -> SelectionService {
    service(display, name, SelectionKind::Clipboard)
}

fn text(service: &SelectionService, target: &str) -> Option<String> {
    let data = service.get(&[target]).unwrap();
    data.bytes(target)
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
}

#[test]
fn test_round_trip_between_services() {
    let display = LocalDisplay::new();
    let writer = clipboard(&display, "writer");
    let reader = clipboard(&display, "reader");

    let content = ContentMap::new()
        .with("STRING", "hello")
        .unwrap()
        .with("application/x-demo", vec![0u8, 159, 146, 150])
        .unwrap();
    writer.set(content).unwrap();

    let data = reader.get(&["STRING", "application/x-demo", "MISSING"]).unwrap();
    assert_eq!(data.len(), 3);
    assert_eq!(data.bytes("STRING"), Some(&b"hello"[..]));
    assert_eq!(data.bytes("application/x-demo"), Some(&[0u8, 159, 146, 150][..]));
    assert!(data.get("MISSING").is_none());
}

#[test]
fn test_targets_lists_pseudo_targets_then_data() {
    let display = LocalDisplay::new();
    let writer = clipboard(&display, "writer");
    let reader = clipboard(&display, "reader");

    writer.set(ContentMap::new()).unwrap();
    let data = reader.get(&["TARGETS"]).unwrap();
    assert_eq!(
        data.get("TARGETS").and_then(SelectionValue::as_targets).unwrap(),
        &["TARGETS", "MULTIPLE", "SAVE_TARGETS"]
    );

    let content = ContentMap::from_pairs([
        ("PLAIN", Some(Payload::from("p"))),
        ("DECLARED", None),
    ])
    .unwrap();
    writer.set(content).unwrap();

    let data = reader.get(&["TARGETS", "PLAIN", "DECLARED"]).unwrap();
    assert_eq!(
        data.get("TARGETS").and_then(SelectionValue::as_targets).unwrap(),
        &["TARGETS", "MULTIPLE", "SAVE_TARGETS", "PLAIN"]
    );
    assert_eq!(data.bytes("PLAIN"), Some(&b"p"[..]));
    assert!(data.get("DECLARED").is_none());
}

#[test]
fn test_getter_retries_once_after_flush_failure() {
    let display = LocalDisplay::new();
    let writer = clipboard(&display, "writer");
    let reader = clipboard(&display, "reader");
    writer.set(ContentMap::new().with("STRING", "kept").unwrap()).unwrap();

    display.fail_flushes("reader-getter", 1);
    assert_eq!(text(&reader, "STRING").as_deref(), Some("kept"));

    display.fail_flushes("reader-getter", 2);
    match reader.get(&["STRING"]) {
        Err(SelectionError::BrokenConnection(TransportError::Flush(_))) => {}
        other => panic!("Expected BrokenConnection, got {:?}", other),
    }

    // The dead getter is replaced on the next call
    assert_eq!(text(&reader, "STRING").as_deref(), Some("kept"));
}

#[test]
fn test_clear_releases_selection() {
    let display = LocalDisplay::new();
    let writer = Clipboard::new(clipboard(&display, "writer"));
    let reader = Clipboard::new(clipboard(&display, "reader"));

    writer.set_text("gone soon").unwrap();
    assert_eq!(reader.get_text().unwrap().as_deref(), Some("gone soon"));

    writer.clear().unwrap();
    assert_eq!(display.owner_of("CLIPBOARD"), NONE);
    assert_eq!(reader.get_text().unwrap(), None);

    // Clearing twice is harmless
    writer.clear().unwrap();
}

#[test]
fn test_overlapping_owners() {
    let display = LocalDisplay::new();
    let first = Clipboard::new(clipboard(&display, "first"));
    let second = Clipboard::new(clipboard(&display, "second"));
    let reader = Clipboard::new(clipboard(&display, "reader"));

    first.set_text("one").unwrap();
    second.set_text("two").unwrap();
    assert_eq!(reader.get_text().unwrap().as_deref(), Some("two"));
    assert_eq!(
        display.client_of(display.owner_of("CLIPBOARD")).as_deref(),
        Some("second-setter")
    );

    first.set_text("three").unwrap();
    assert_eq!(reader.get_text().unwrap().as_deref(), Some("three"));
    assert_eq!(second.get_text().unwrap().as_deref(), Some("three"));
}

#[test]
fn test_replies_never_mix_snapshots() {
    let display = LocalDisplay::new();
    let writer = clipboard(&display, "writer");
    let reader = clipboard(&display, "reader");

    let snapshot = |value: &str| {
        ContentMap::new()
            .with("A", value)
            .unwrap()
            .with("B", value)
            .unwrap()
    };
    writer.set(snapshot("0")).unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            for round in 1..=20 {
                writer.set(snapshot(&round.to_string())).unwrap();
            }
        });

        for _ in 0..20 {
            let data = reader.get(&["A", "B"]).unwrap();
            assert_eq!(data.bytes("A"), data.bytes("B"));
        }
    });
}

#[test]
fn test_selections_are_independent() {
    let display = LocalDisplay::new();
    let clipboard_writer = Clipboard::new(clipboard(&display, "cw"));
    let primary_writer = Clipboard::new(service(&display, "pw", SelectionKind::Primary));
    let clipboard_reader = Clipboard::new(clipboard(&display, "cr"));
    let primary_reader = Clipboard::new(service(&display, "pr", SelectionKind::Primary));

    clipboard_writer.set_text("copied").unwrap();
    primary_writer.set_text("highlighted").unwrap();

    assert_eq!(clipboard_reader.get_text().unwrap().as_deref(), Some("copied"));
    assert_eq!(primary_reader.get_text().unwrap().as_deref(), Some("highlighted"));
}

#[test]
fn test_rich_text_round_trip() {
    let display = LocalDisplay::new();
    let writer = Clipboard::new(clipboard(&display, "writer"));
    let reader = Clipboard::new(clipboard(&display, "reader"));

    writer.set_rich_text("naïve", "<b>naïve</b>").unwrap();
    let (text, html) = reader.get_rich_text().unwrap();
    assert_eq!(text.as_deref(), Some("naïve"));
    assert_eq!(html.as_deref(), Some("<b>naïve</b>"));

    let data = reader.get(&["STRING"]).unwrap();
    assert_eq!(data.bytes("STRING"), Some(&b"nave"[..]));

    writer.set_rich_text("", "<i>only</i>").unwrap();
    let (text, html) = reader.get_rich_text().unwrap();
    assert_eq!(text, None);
    assert_eq!(html.as_deref(), Some("<i>only</i>"));
}

#[test]
fn test_multiple_request_from_raw_client() {
    let display = LocalDisplay::new();
    let writer = clipboard(&display, "writer");
    writer.set(ContentMap::new().with("STRING", "multi").unwrap()).unwrap();

    let conn = display.open("raw");
    let window = conn.create_window("raw").unwrap();
    let atom = |name: &str| conn.intern_atom(name).unwrap();
    let (clipboard_atom, multiple) = (atom("CLIPBOARD"), atom("MULTIPLE"));
    let atom_pair = atom("ATOM_PAIR");
    let (string, missing) = (atom("STRING"), atom("MISSING"));
    let (pairs, first, second) = (atom("PAIRS"), atom("FIRST"), atom("SECOND"));

    conn.change_property(
        window,
        pairs,
        Property::atoms(atom_pair, vec![string, first, missing, second]),
    )
    .unwrap();
    conn.convert_selection(window, clipboard_atom, multiple, pairs, CURRENT_TIME)
        .unwrap();
    conn.flush().unwrap();

    let events = conn.events();
    let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
    let SelectionEvent::Notify { property, target, .. } = event else {
        panic!("Expected notify, got {:?}", event);
    };
    assert_eq!(target, multiple);
    assert_eq!(property, pairs);

    let data = conn.get_property(window, first, true).unwrap().unwrap();
    assert_eq!(data.as_bytes(), Some(&b"multi"[..]));

    let answered = conn.get_property(window, pairs, true).unwrap().unwrap();
    assert_eq!(answered.as_atoms(), Some(&[string, first, missing, NONE][..]));
}

#[test]
fn test_store_hands_content_to_manager() {
    let display = LocalDisplay::new();
    let manager = SelectionManagerStub::start(&display).unwrap();
    let reader = clipboard(&display, "reader");

    {
        let writer = clipboard(&display, "writer");
        let content = ContentMap::from_pairs([
            ("UTF8_STRING", Some(Payload::from("persisted"))),
            ("NOTHING", None),
        ])
        .unwrap();
        writer.set(content).unwrap();
        writer.store().unwrap();
    }

    assert_eq!(manager.saved_targets(), vec!["UTF8_STRING".to_string()]);
    assert_eq!(text(&reader, "UTF8_STRING").as_deref(), Some("persisted"));
}

#[test]
fn test_store_refused_by_manager() {
    let display = LocalDisplay::new();
    let _manager = SelectionManagerStub::start_refusing(&display).unwrap();
    let writer = clipboard(&display, "writer");

    writer.set(ContentMap::new().with("STRING", "x").unwrap()).unwrap();
    match writer.store() {
        Err(SelectionError::ManagerHandoffFailed) => {}
        other => panic!("Expected ManagerHandoffFailed, got {:?}", other),
    }
}

#[test]
fn test_store_times_out_on_silent_manager() {
    let display = LocalDisplay::new();
    let silent = display.open("silent-manager");
    let window = silent.create_window("silent-manager").unwrap();
    let manager_atom = silent.intern_atom("CLIPBOARD_MANAGER").unwrap();
    silent.set_selection_owner(window, manager_atom, CURRENT_TIME).unwrap();

    let writer = clipboard(&display, "writer");
    writer.set(ContentMap::new().with("STRING", "kept").unwrap()).unwrap();

    match writer.store() {
        Err(SelectionError::ManagerHandoffTimeout(ms)) => {
            assert_eq!(ms, SelectionConfig::default().handoff_timeout_ms)
        }
        other => panic!("Expected ManagerHandoffTimeout, got {:?}", other),
    }

    // Ownership of the live content is untouched
    assert_eq!(
        display.client_of(display.owner_of("CLIPBOARD")).as_deref(),
        Some("writer-setter")
    );
    assert_eq!(text(&clipboard(&display, "reader"), "STRING").as_deref(), Some("kept"));
}

#[test]
fn test_set_recovers_after_flush_failure() {
    let display = LocalDisplay::new();
    let writer = clipboard(&display, "writer");
    let reader = clipboard(&display, "reader");

    writer.set(ContentMap::new().with("STRING", "first").unwrap()).unwrap();

    display.fail_flushes("writer-setter", 1);
    writer.set(ContentMap::new().with("STRING", "second").unwrap()).unwrap();

    assert_eq!(text(&reader, "STRING").as_deref(), Some("second"));
    assert_eq!(
        display.client_of(display.owner_of("CLIPBOARD")).as_deref(),
        Some("writer-setter")
    );
}

#[test]
fn test_set_surfaces_second_failure() {
    let display = LocalDisplay::new();
    let writer = clipboard(&display, "writer");
    let reader = clipboard(&display, "reader");

    writer.set(ContentMap::new().with("STRING", "first").unwrap()).unwrap();

    // One failure for the current setter, one for its replacement
    display.fail_flushes("writer-setter", 2);
    match writer.set(ContentMap::new().with("STRING", "second").unwrap()) {
        Err(SelectionError::BrokenConnection(TransportError::Flush(_))) => {}
        other => panic!("Expected BrokenConnection, got {:?}", other),
    }
    assert_eq!(text(&reader, "STRING"), None);

    // The next call starts over on a fresh setter
    writer.set(ContentMap::new().with("STRING", "third").unwrap()).unwrap();
    assert_eq!(text(&reader, "STRING").as_deref(), Some("third"));
}

#[test]
fn test_store_noops() {
    let display = LocalDisplay::new();
    let _manager = SelectionManagerStub::start(&display).unwrap();

    let primary = service(&display, "primary", SelectionKind::Primary);
    primary.set(ContentMap::new().with("STRING", "x").unwrap()).unwrap();
    primary.store().unwrap();

    // Not owning anything
    clipboard(&display, "idle").store().unwrap();
}

#[test]
fn test_setter_recovers_after_disconnect() {
    let display = LocalDisplay::new();
    let writer = clipboard(&display, "writer");
    let reader = clipboard(&display, "reader");

    writer.set(ContentMap::new().with("STRING", "durable").unwrap()).unwrap();
    display.disconnect("writer-setter");

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if text(&reader, "STRING").as_deref() == Some("durable") {
            break;
        }
        assert!(Instant::now() < deadline, "setter was not recovered");
        thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(
        display.client_of(display.owner_of("CLIPBOARD")).as_deref(),
        Some("writer-setter")
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_payload_round_trip(bytes in proptest::collection::vec(any::<u8>(), 1..256)) {
        let display = LocalDisplay::new();
        let writer = clipboard(&display, "writer");
        let reader = clipboard(&display, "reader");

        let content = ContentMap::new().with("application/octet-stream", bytes.clone()).unwrap();
        writer.set(content).unwrap();
        let data = reader.get(&["application/octet-stream"]).unwrap();
        prop_assert_eq!(data.bytes("application/octet-stream"), Some(&bytes[..]));
    }
}
