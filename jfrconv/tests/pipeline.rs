//! End-to-end conversion tests over synthetic recordings.

use jfr_parse::testutil::ChunkBuilder;
use jfr_parse::{frame, JfrReader};
use jfrconv::collapsed::CollapsedStacks;
use jfrconv::flame::FlameGraph;
use jfrconv::jfr::JfrConverter;
use jfrconv::{pprof, Arguments};

/// Three execution samples on two stacks:
/// `Main.work` twice and `Main.work -> Main.idle` once.
fn cpu_recording() -> Vec<u8> {
    ChunkBuilder::new()
        .symbol(1, b"com/example/Main")
        .symbol(2, b"work")
        .symbol(3, b"idle")
        .symbol(4, b"java/lang/Integer")
        .class(10, 1)
        .class(11, 4)
        .method(20, 10, 2)
        .method(21, 10, 3)
        .stack_trace(30, &[(20, 5, 0, frame::JIT_COMPILED)])
        .stack_trace(31, &[(21, 8, 0, frame::JIT_COMPILED), (20, 5, 0, frame::JIT_COMPILED)])
        .thread(7, "worker")
        .execution_sample(1_000_000, 7, 30, 1)
        .execution_sample(2_000_000, 7, 31, 1)
        .execution_sample(3_000_000, 7, 30, 1)
        .build()
}

fn reader(data: &[u8]) -> JfrReader {
    JfrReader::new(data.to_vec()).unwrap()
}

fn to_collapsed(data: &[u8], args: &Arguments) -> String {
    let mut jfr = reader(data);
    let mut sink = CollapsedStacks::new(Vec::new());
    JfrConverter::new(&mut jfr, args).convert(&mut sink).unwrap();
    String::from_utf8(sink.finish().unwrap()).unwrap()
}

fn to_flame_html(data: &[u8], args: &Arguments) -> String {
    let mut jfr = reader(data);
    let mut fg = FlameGraph::new(args.clone());
    JfrConverter::new(&mut jfr, args).convert(&mut fg).unwrap();
    let mut out = Vec::new();
    fg.dump(&mut out).unwrap();
    String::from_utf8(out).unwrap()
}

fn to_pprof(data: &[u8], args: &Arguments) -> Vec<u8> {
    let mut jfr = reader(data);
    let mut out = Vec::new();
    pprof::convert(&mut jfr, args, &mut out).unwrap();
    out
}

#[test]
fn collapsed_output_carries_suffixed_traces() {
    let out = to_collapsed(&cpu_recording(), &Arguments::default());
    let mut lines: Vec<&str> = out.lines().collect();
    lines.sort_unstable();

    assert_eq!(
        lines,
        vec![
            "com/example/Main.work_[j] 2",
            "com/example/Main.work_[j];com/example/Main.idle_[j] 1",
        ]
    );
}

#[test]
fn flame_html_via_collapsed_matches_direct() {
    let args = Arguments::default();
    let direct = to_flame_html(&cpu_recording(), &args);

    let collapsed = to_collapsed(&cpu_recording(), &args);
    let mut fg = FlameGraph::new(args);
    fg.parse(std::io::Cursor::new(collapsed)).unwrap();
    let mut out = Vec::new();
    fg.dump(&mut out).unwrap();
    let via_collapsed = String::from_utf8(out).unwrap();

    assert_eq!(direct, via_collapsed);
}

#[test]
fn threads_prepend_a_thread_frame() {
    let args = Arguments {
        threads: true,
        ..Arguments::default()
    };
    let out = to_collapsed(&cpu_recording(), &args);
    for line in out.lines() {
        assert!(
            line.starts_with("[worker tid=7];"),
            "missing thread frame: {}",
            line
        );
    }
}

#[test]
fn classify_prepends_a_category_frame() {
    let args = Arguments {
        classify: true,
        ..Arguments::default()
    };
    let out = to_collapsed(&cpu_recording(), &args);
    for line in out.lines() {
        assert!(line.starts_with("[java];"), "missing category frame: {}", line);
    }
}

#[test]
fn dotted_simple_names() {
    let args = Arguments {
        dot: true,
        simple: true,
        ..Arguments::default()
    };
    let out = to_collapsed(&cpu_recording(), &args);
    assert!(out.contains("Main.work_[j]"));
    assert!(!out.contains("com/example"));
}

#[test]
fn line_numbers_decorate_method_names() {
    let args = Arguments {
        lines: true,
        ..Arguments::default()
    };
    let out = to_collapsed(&cpu_recording(), &args);
    assert!(out.contains("com/example/Main.work:5_[j]"));
    assert!(out.contains("com/example/Main.idle:8_[j]"));
}

#[test]
fn state_filter_rejects_other_states() {
    let keep = Arguments {
        state: Some("runnable".to_string()),
        ..Arguments::default()
    };
    assert_eq!(to_collapsed(&cpu_recording(), &keep).lines().count(), 2);

    let drop = Arguments {
        state: Some("sleeping".to_string()),
        ..Arguments::default()
    };
    assert_eq!(to_collapsed(&cpu_recording(), &drop), "");
}

#[test]
fn time_window_filters_samples() {
    // Samples sit at 1, 2, and 3 ms from the recording start.
    let args = Arguments {
        from: 2,
        to: 3,
        ..Arguments::default()
    };
    let out = to_collapsed(&cpu_recording(), &args);
    let mut lines: Vec<&str> = out.lines().collect();
    lines.sort_unstable();
    assert_eq!(
        lines,
        vec![
            "com/example/Main.work_[j] 1",
            "com/example/Main.work_[j];com/example/Main.idle_[j] 1",
        ]
    );
}

#[test]
fn allocation_class_becomes_leaf_frame() {
    let data = ChunkBuilder::new()
        .symbol(1, b"com/example/Main")
        .symbol(2, b"work")
        .symbol(4, b"java/lang/Integer")
        .class(10, 1)
        .class(11, 4)
        .method(20, 10, 2)
        .stack_trace(30, &[(20, 5, 0, frame::JIT_COMPILED)])
        .allocation_in_tlab(1_000_000, 7, 30, 11, 64, 4096)
        .allocation_outside_tlab(2_000_000, 7, 30, 10, 128)
        .build();

    let args = Arguments {
        alloc: true,
        total: true,
        ..Arguments::default()
    };
    let out = to_collapsed(&data, &args);
    let mut lines: Vec<&str> = out.lines().collect();
    lines.sort_unstable();
    assert_eq!(
        lines,
        vec![
            // in-TLAB and outside-TLAB samples differ in the leaf suffix
            "com/example/Main.work_[j];com.example.Main_[k] 128",
            "com/example/Main.work_[j];java.lang.Integer_[i] 64",
        ]
    );
}

#[test]
fn open_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rec.jfr");
    std::fs::write(&path, cpu_recording()).unwrap();

    let mut jfr = JfrReader::open(&path).unwrap();
    assert!(jfr.next_chunk().unwrap());
    assert_eq!(jfr.threads[&7], "worker");
}

// A minimal protobuf walker for asserting on emitted pprof bytes.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Varint(u64),
    Bytes(Vec<u8>),
}

fn read_varint(data: &[u8]) -> (u64, &[u8]) {
    let mut value = 0u64;
    let mut shift = 0;
    for (i, &b) in data.iter().enumerate() {
        value |= ((b & 0x7f) as u64) << shift;
        if b & 0x80 == 0 {
            return (value, &data[i + 1..]);
        }
        shift += 7;
    }
    panic!("truncated varint");
}

fn parse_message(mut data: &[u8]) -> Vec<(u32, Value)> {
    let mut fields = Vec::new();
    while !data.is_empty() {
        let (tag, rest) = read_varint(data);
        data = rest;
        let field = (tag >> 3) as u32;
        match tag & 7 {
            0 => {
                let (v, rest) = read_varint(data);
                data = rest;
                fields.push((field, Value::Varint(v)));
            }
            2 => {
                let (len, rest) = read_varint(data);
                data = rest;
                let len = len as usize;
                fields.push((field, Value::Bytes(data[..len].to_vec())));
                data = &data[len..];
            }
            wire => panic!("unexpected wire type {}", wire),
        }
    }
    fields
}

fn varints(fields: &[(u32, Value)], field: u32) -> Vec<u64> {
    fields
        .iter()
        .filter(|(f, _)| *f == field)
        .map(|(_, v)| match v {
            Value::Varint(n) => *n,
            Value::Bytes(_) => panic!("expected varint in field {}", field),
        })
        .collect()
}

fn messages(fields: &[(u32, Value)], field: u32) -> Vec<Vec<(u32, Value)>> {
    fields
        .iter()
        .filter(|(f, _)| *f == field)
        .map(|(_, v)| match v {
            Value::Bytes(b) => parse_message(b),
            Value::Varint(_) => panic!("expected message in field {}", field),
        })
        .collect()
}

fn string_table(fields: &[(u32, Value)]) -> Vec<String> {
    fields
        .iter()
        .filter(|(f, _)| *f == 6)
        .map(|(_, v)| match v {
            Value::Bytes(b) => String::from_utf8(b.clone()).unwrap(),
            Value::Varint(_) => panic!("string table entry must be bytes"),
        })
        .collect()
}

#[test]
fn pprof_single_sample_total() {
    let data = ChunkBuilder::new()
        .symbol(1, b"com/example/Main")
        .symbol(2, b"work")
        .symbol(3, b"idle")
        .class(10, 1)
        .method(20, 10, 2)
        .method(21, 10, 3)
        .stack_trace(31, &[(21, 8, 0, frame::JIT_COMPILED), (20, 5, 0, frame::JIT_COMPILED)])
        .execution_sample(1_000_000, 7, 31, 1)
        .build();

    let args = Arguments {
        total: true,
        ..Arguments::default()
    };
    let profile = parse_message(&to_pprof(&data, &args));
    let strings = string_table(&profile);

    let sample_types = messages(&profile, 1);
    assert_eq!(sample_types.len(), 1);
    let type_index = varints(&sample_types[0], 1)[0] as usize;
    let unit_index = varints(&sample_types[0], 2)[0] as usize;
    assert_eq!(strings[type_index], "cpu");
    assert_eq!(strings[unit_index], "nanoseconds");

    let samples = messages(&profile, 2);
    assert_eq!(samples.len(), 1);
    assert_eq!(varints(&samples[0], 1).len(), 2);
    assert_eq!(varints(&samples[0], 2), vec![1_000_000]);
}

#[test]
fn pprof_count_mode() {
    let args = Arguments::default();
    let profile = parse_message(&to_pprof(&cpu_recording(), &args));
    let strings = string_table(&profile);

    let sample_types = messages(&profile, 1);
    let unit_index = varints(&sample_types[0], 2)[0] as usize;
    assert_eq!(strings[unit_index], "count");

    let samples = messages(&profile, 2);
    assert_eq!(samples.len(), 2);
    let mut values: Vec<u64> = samples.iter().flat_map(|s| varints(s, 2)).collect();
    values.sort_unstable();
    assert_eq!(values, vec![1, 2]);
}

#[test]
fn pprof_references_resolve() {
    let args = Arguments {
        threads: true,
        classify: true,
        ..Arguments::default()
    };
    let profile = parse_message(&to_pprof(&cpu_recording(), &args));
    let strings = string_table(&profile);
    assert_eq!(strings[0], "");
    assert!(strings.contains(&"async-profiler".to_string()));
    assert!(strings.contains(&"thread".to_string()));
    assert!(strings.contains(&"category".to_string()));

    let location_ids: Vec<u64> = messages(&profile, 4)
        .iter()
        .map(|l| varints(l, 1)[0])
        .collect();
    let function_ids: Vec<u64> = messages(&profile, 5)
        .iter()
        .map(|f| varints(f, 1)[0])
        .collect();
    assert!(!location_ids.is_empty());
    assert!(location_ids.iter().all(|&id| id >= 1));

    for location in messages(&profile, 4) {
        for line in messages(&location, 4) {
            let function_id = varints(&line, 1)[0];
            assert!(function_ids.contains(&function_id));
        }
    }
    for function in messages(&profile, 5) {
        let name_index = varints(&function, 2)[0] as usize;
        assert!(name_index < strings.len());
    }
    for sample in messages(&profile, 2) {
        for id in varints(&sample, 1) {
            assert!(location_ids.contains(&id));
        }
        for label in messages(&sample, 3) {
            assert!((varints(&label, 1)[0] as usize) < strings.len());
            assert!((varints(&label, 2)[0] as usize) < strings.len());
        }
    }

    // recording clock fields round the profile out
    assert!(!varints(&profile, 9).is_empty());
    assert!(!varints(&profile, 10).is_empty());
    let comment_index = varints(&profile, 13)[0] as usize;
    assert_eq!(strings[comment_index], "async-profiler");
}

#[test]
fn pprof_output_is_deterministic() {
    let args = Arguments {
        threads: true,
        total: true,
        ..Arguments::default()
    };
    let first = to_pprof(&cpu_recording(), &args);
    let second = to_pprof(&cpu_recording(), &args);
    assert_eq!(first, second);
}
