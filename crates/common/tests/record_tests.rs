use snapstep_common::types::{HeapEntry, PrimitiveValue, Record, RefId, ValueDescriptor};
use tracing::info;

/// A stream as the recorder writes it for a two-line program
const STREAM: &str = r#"{"type":"start","className":"Add","files":1}
{"type":"frame","step":1,"line":3,"className":"Add","methodName":"main","callStack":[{"className":"Add","methodName":"main","line":3,"params":{"args":"@1"}}],"variables":{"args":{"type":"java.lang.String[]","value":"@1","id":"ref@1"}},"statics":{},"heap":{"ref@1":{"type":"java.lang.String[]","elements":[]}},"stdout":""}
{"type":"frame","step":2,"line":4,"className":"Add","methodName":"main","callStack":[{"className":"Add","methodName":"main","line":4,"params":{"args":"@1"}}],"variables":{"args":{"type":"java.lang.String[]","value":"@1","id":"ref@1"},"x":{"type":"int","value":"5"}},"statics":{"greeting":{"type":"String","value":"\"hi\""},"ratio":{"type":"double","value":"0.5"}},"heap":{"ref@1":{"type":"java.lang.String[]","elements":[]}},"stdout":""}
{"type":"stdout","output":"5\n"}
{"type":"end"}
"#;

fn parse(stream: &str) -> Vec<Record> {
    stream.lines().map(|line| serde_json::from_str(line).unwrap()).collect()
}

#[test]
fn test_parse_recorded_stream() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");

    let records = parse(STREAM);
    assert_eq!(records.len(), 5);
    assert_eq!(records[0], Record::start("Add", 1));
    assert_eq!(records[3], Record::stdout("5\n"));
    assert_eq!(records[4], Record::End);

    let steps: Vec<_> = records.iter().filter_map(Record::as_step).collect();
    assert_eq!(steps.iter().map(|s| s.step).collect::<Vec<_>>(), vec![1, 2]);

    let second = steps[1];
    assert_eq!(
        second.variables.get("x"),
        Some(&ValueDescriptor::Primitive(PrimitiveValue::Int(5)))
    );
    assert_eq!(second.statics.get("greeting"), Some(&ValueDescriptor::Text("hi".into())));
    assert_eq!(
        second.statics.get("ratio"),
        Some(&ValueDescriptor::Primitive(PrimitiveValue::Double(0.5)))
    );
    assert_eq!(second.call_stack[0].params.get("args").map(String::as_str), Some("@1"));
    assert_eq!(
        second.heap.get(RefId(1)),
        Some(&HeapEntry::Array { type_name: "java.lang.String[]".into(), elements: vec![] })
    );
}

#[test]
fn test_stream_round_trips_line_by_line() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");

    for (record, line) in parse(STREAM).iter().zip(STREAM.lines()) {
        let written: serde_json::Value = serde_json::to_value(record).unwrap();
        let original: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(written, original);
    }
}

#[test]
fn test_references_resolve_through_heap() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");

    for step in parse(STREAM).iter().filter_map(Record::as_step) {
        for descriptor in step.variables.values().chain(step.statics.values()) {
            if let Some(id) = descriptor.ref_id() {
                assert!(step.heap.contains(id), "step {} misses heap entry {id}", step.step);
            }
        }
    }
}
