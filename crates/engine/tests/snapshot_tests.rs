use snapstep_common::types::{HeapEntry, PrimitiveValue, RefId, ValueDescriptor};
use snapstep_engine::{
    scripted::{ScriptedFrame, ScriptedTarget, ScriptedWorld},
    DebugTarget, Location, ObjectRef, RuntimeValue, SnapshotBuilder, SnapshotError, TypeRef,
};
use std::time::Duration;
use tracing::info;

const THREAD: u64 = 1;

fn int(value: i32) -> RuntimeValue {
    RuntimeValue::Primitive(PrimitiveValue::Int(value))
}

/// Deliver a single step into `world` so the target is suspended there
fn suspended_at(world: ScriptedWorld) -> (ScriptedTarget, Location) {
    let mut target = ScriptedTarget::new();
    target.step(THREAD, world);
    let set = target.next_event_set(Duration::from_secs(1)).unwrap().unwrap();
    let location = match &set.events[0] {
        snapstep_engine::DebugEvent::Step { location, .. } => location.clone(),
        other => panic!("expected a step, got {other:?}"),
    };
    (target, location)
}

#[test]
fn test_call_stack_keeps_scope_frames_and_arguments_only() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");

    let world = ScriptedWorld::new()
        .frame(
            THREAD,
            ScriptedFrame::new("Fib", "fib", 7).argument("n", int(1)).local("tmp", int(0)),
        )
        .frame(THREAD, ScriptedFrame::new("java.util.Helper", "apply", 40).argument("x", int(9)))
        .frame(THREAD, ScriptedFrame::new("Fib", "fib", 9).argument("n", int(2)))
        .frame(
            THREAD,
            ScriptedFrame::new("Fib", "main", 3)
                .argument("args", RuntimeValue::Array(ObjectRef::new(50, "java.lang.String[]"))),
        );
    let (mut target, location) = suspended_at(world);

    let record = SnapshotBuilder::new(&mut target, "Fib")
        .build(THREAD, &location, 4, String::new())
        .unwrap();

    assert_eq!(record.step, 4);
    assert_eq!(record.line, 7);
    assert_eq!(record.method_name, "fib");
    let stack: Vec<_> =
        record.call_stack.iter().map(|f| (f.method_name.as_str(), f.line)).collect();
    assert_eq!(stack, vec![("fib", 7), ("fib", 9), ("main", 3)]);
    assert!(record.call_stack.iter().all(|f| f.class_name == "Fib"));

    let top = &record.call_stack[0];
    assert_eq!(top.params.len(), 1);
    assert_eq!(top.params.get("n").map(String::as_str), Some("1"));
    assert_eq!(record.call_stack[2].params.get("args").map(String::as_str), Some("@50"));

    // Caller arguments are short form only and never reach the heap
    assert!(!record.heap.contains(RefId(50)));
    assert_eq!(record.variables.len(), 2);
}

#[test]
fn test_shared_array_is_registered_once() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");

    let shared = RuntimeValue::Array(ObjectRef::new(7, "int[]"));
    let world = ScriptedWorld::new()
        .frame(
            THREAD,
            ScriptedFrame::new("Main", "main", 5)
                .local("a", shared.clone())
                .local("b", shared.clone()),
        )
        .static_field("Main", "cache", shared)
        .array(7, vec![int(1), int(2), int(3)]);
    let (mut target, location) = suspended_at(world);

    let record = SnapshotBuilder::new(&mut target, "Main")
        .build(THREAD, &location, 1, String::new())
        .unwrap();

    let expected = ValueDescriptor::Reference { type_name: "int[]".into(), id: RefId(7) };
    assert_eq!(record.variables.get("a"), Some(&expected));
    assert_eq!(record.variables.get("b"), Some(&expected));
    assert_eq!(record.statics.get("cache"), Some(&expected));
    assert_eq!(record.heap.len(), 1);
    assert_eq!(
        record.heap.get(RefId(7)),
        Some(&HeapEntry::Array {
            type_name: "int[]".into(),
            elements: vec!["1".into(), "2".into(), "3".into()],
        })
    );
}

#[test]
fn test_object_fields_are_one_level_deep() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");

    let head = RuntimeValue::Object(ObjectRef::new(11, "Node"));
    let next = RuntimeValue::Object(ObjectRef::new(12, "Node"));
    let world = ScriptedWorld::new()
        .frame(THREAD, ScriptedFrame::new("List", "main", 8).local("head", head))
        .object(
            11,
            vec![("value", int(1)), ("label", RuntimeValue::Text("one".into())), ("next", next)],
        )
        .object(
            12,
            vec![("value", int(2)), ("label", RuntimeValue::Null), ("next", RuntimeValue::Null)],
        );
    let (mut target, location) = suspended_at(world);

    let record = SnapshotBuilder::new(&mut target, "List")
        .build(THREAD, &location, 1, String::new())
        .unwrap();

    assert_eq!(record.heap.len(), 1);
    match record.heap.get(RefId(11)) {
        Some(HeapEntry::Object { type_name, fields }) => {
            assert_eq!(type_name, "Node");
            let fields: Vec<_> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            assert_eq!(fields, vec![("value", "1"), ("label", "\"one\""), ("next", "@12")]);
        }
        other => panic!("expected an object entry, got {other:?}"),
    }
    assert!(!record.heap.contains(RefId(12)));
}

#[test]
fn test_locals_statics_and_strings() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");

    let world = ScriptedWorld::new()
        .frame(
            THREAD,
            ScriptedFrame::new("Main", "main", 6)
                .local("name", RuntimeValue::Text("Ada".into()))
                .local("c", RuntimeValue::Primitive(PrimitiveValue::Char('x' as u16)))
                .local("missing", RuntimeValue::Null),
        )
        .static_field("Main", "count", int(3))
        .static_field("Other", "ignored", int(4));
    let (mut target, location) = suspended_at(world);

    let record = SnapshotBuilder::new(&mut target, "Main")
        .build(THREAD, &location, 1, "out".into())
        .unwrap();

    assert_eq!(record.variables.get("name"), Some(&ValueDescriptor::Text("Ada".into())));
    assert_eq!(record.variables.get("missing"), Some(&ValueDescriptor::Null));
    assert_eq!(record.variables.get("c").map(ValueDescriptor::short_form).as_deref(), Some("'x'"));
    assert_eq!(record.statics.keys().collect::<Vec<_>>(), vec!["count"]);
    assert!(record.heap.is_empty());
    assert_eq!(record.stdout, "out");
}

#[test]
fn test_unreadable_items_are_omitted() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");

    let node = RuntimeValue::Object(ObjectRef::new(21, "Node"));
    let world = ScriptedWorld::new()
        .frame(
            THREAD,
            ScriptedFrame::new("Main", "helper", 12)
                .local("ok", int(1))
                .unreadable_local("broken")
                .local("node", node),
        )
        .frame(
            THREAD,
            ScriptedFrame::new("Main", "main", 4)
                .argument("args", RuntimeValue::Null)
                .without_debug_info(),
        )
        .unreadable_static("Main", "lazy")
        .static_field("Main", "ready", RuntimeValue::Primitive(PrimitiveValue::Boolean(true)))
        .unreadable_object(21);
    let (mut target, location) = suspended_at(world);

    let record = SnapshotBuilder::new(&mut target, "Main")
        .build(THREAD, &location, 1, String::new())
        .unwrap();

    assert_eq!(record.variables.keys().collect::<Vec<_>>(), vec!["ok", "node"]);
    assert_eq!(record.statics.keys().collect::<Vec<_>>(), vec!["ready"]);
    // The reference stays, its entry does not
    assert_eq!(record.variables.get("node").and_then(ValueDescriptor::ref_id), Some(RefId(21)));
    assert!(record.heap.is_empty());
    // A frame without debug information still appears, without params
    assert_eq!(record.call_stack.len(), 2);
    assert!(record.call_stack[1].params.is_empty());
}

#[test]
fn test_unreadable_stack_fails_the_build() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");

    let world =
        ScriptedWorld::new().frame(THREAD, ScriptedFrame::new("Main", "main", 3)).without_stacks();
    let (mut target, location) = suspended_at(world);
    let result = SnapshotBuilder::new(&mut target, "Main")
        .build(THREAD, &location, 1, String::new());
    assert!(matches!(result, Err(SnapshotError::Stack(_))));

    let location = Location::new(TypeRef::new(0, "Main"), "main", 3);
    let mut empty = ScriptedTarget::new();
    let result = SnapshotBuilder::new(&mut empty, "Main")
        .build(THREAD, &location, 1, String::new());
    assert!(matches!(result, Err(SnapshotError::EmptyStack(THREAD))));
}
