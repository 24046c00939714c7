//! Integration tests for label interning under churn and across store
//! instances sharing one file.

use tempfile::tempdir;
use varve::labels::{LabelOptions, LabelStore};
use varve::naming;
use varve::writer::SerieWriter;

#[test]
fn ten_thousand_labels_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("serie.labels");
    let options = LabelOptions {
        mode: 0o666,
        block: 4096,
    };

    let mut store = LabelStore::open_rw(&path, options).unwrap();
    for i in 0..10_000 {
        let name = format!("{i}-more-equal");
        let id = store.intern(&name).unwrap();
        assert_eq!(store.load(id).unwrap(), name, "round trip of '{name}'");
    }

    // A second store over the same file agrees on every id.
    let mut other = LabelStore::open_rw(&path, options).unwrap();
    let id_other = other.intern("8756-more-equal").unwrap();
    let id_first = store.intern("8756-more-equal").unwrap();
    assert_eq!(id_other, id_first);
}

#[test]
fn distinct_strings_get_distinct_ids() {
    let dir = tempdir().unwrap();
    let mut store = LabelStore::open_rw(
        dir.path().join("serie.labels"),
        LabelOptions::default(),
    )
    .unwrap();

    let mut ids = std::collections::HashSet::new();
    for i in 0..1000 {
        let id = store.intern(&format!("label-{i}")).unwrap();
        assert!(id != 0, "0 is reserved");
        assert!(ids.insert(id), "id {id} was handed out twice");
    }

    // Stability: asking again changes nothing.
    for i in 0..1000 {
        let id = store.intern(&format!("label-{i}")).unwrap();
        assert!(ids.contains(&id));
    }
}

/// Walks a sealed label file record by record through the public API.
fn collect_labels(store: &LabelStore) -> Vec<String> {
    let mut labels = Vec::new();
    let mut offset = 0usize;
    loop {
        let Ok(name) = store.load(offset as u32 + 1) else {
            break;
        };
        if name.is_empty() {
            break;
        }
        offset += (4 + name.len()).div_ceil(8) * 8;
        labels.push(name);
    }
    labels
}

#[test]
fn a_rotated_shard_only_holds_its_own_labels() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("serie");

    let mut writer = SerieWriter::new(&base);
    writer.data_options.max_entries = 32;
    writer.label_options.block = 128;
    writer.open().unwrap();

    // 200 records with three unique labels each plus two recycled ones
    // roll the series into a second shard after 127 records.
    for i in 1..=200u64 {
        let labels = vec![
            format!("foo-{i}.1"),
            "foo.2".to_string(),
            format!("foo-{i}.3"),
            "foo.4".to_string(),
            format!("foo-{i}.5"),
        ];
        writer.append(i, i, &labels).unwrap();
    }
    writer.close().unwrap();

    // Shard 1 interned labels for records 1..=127 and nothing further:
    // three unique strings per record and the two recycled ones. The
    // interning for record 128 was skipped because the shard had no room,
    // so none of its strings leaked into this file.
    let sealed = LabelStore::open_ro(naming::labels_path(&base, 1)).unwrap();
    let labels = collect_labels(&sealed);
    assert_eq!(labels.len(), 3 * 127 + 2);
    assert!(labels.contains(&"foo-127.5".to_string()));
    assert!(!labels.iter().any(|l| l.starts_with("foo-128.")));

    // Shard 2 starts over: same recycled strings, new ids, its own file.
    let second = LabelStore::open_ro(naming::labels_path(&base, 2)).unwrap();
    let labels = collect_labels(&second);
    assert!(labels.contains(&"foo.2".to_string()));
    assert!(labels.contains(&"foo-128.1".to_string()));
}
