//! Save/load round-trips and stability of the model format.

use regrove::{Forest, Sample};

fn sample(suid: &str, present: &[i32], y: f32) -> Sample {
    Sample::new(suid, present.iter().map(|&c| (c, 1.0)), y)
}

fn learned_forest() -> Forest {
    let mut forest = Forest::new(3);
    for i in 0..40 {
        forest.add(sample(&format!("pos{i}"), &[1, (i % 5) as i32 + 10], 1.0));
        forest.add(sample(&format!("neg{i}"), &[(i % 7) as i32 + 10], 0.0));
    }
    forest.commit();
    forest
}

#[test]
fn round_trip_preserves_classification_bit_for_bit() {
    let mut original = learned_forest();
    let mut buf = Vec::new();
    original.save(&mut buf).unwrap();

    let mut loaded = Forest::load(buf.as_slice()).unwrap();
    assert!(loaded.validate());
    assert_eq!(loaded.n_trees(), original.n_trees());

    let probes = [
        sample("q1", &[1], 0.0),
        sample("q2", &[], 0.0),
        sample("q3", &[1, 10, 11], 0.0),
        sample("q4", &[12], 0.0),
    ];
    for probe in &probes {
        assert_eq!(
            original.classify(probe).to_bits(),
            loaded.classify(probe).to_bits(),
            "classification diverged after a round trip"
        );
    }
}

#[test]
fn round_trip_preserves_the_sample_table() {
    let mut original = learned_forest();
    let mut buf = Vec::new();
    original.save(&mut buf).unwrap();
    let mut loaded = Forest::load(buf.as_slice()).unwrap();

    let originals: Vec<(String, f32, Vec<(i32, f32)>)> = original
        .samples()
        .map(|s| {
            (
                s.suid.clone(),
                s.y,
                s.x_codes.iter().map(|(&c, &v)| (c, v)).collect(),
            )
        })
        .collect();
    let loadeds: Vec<(String, f32, Vec<(i32, f32)>)> = loaded
        .samples()
        .map(|s| {
            (
                s.suid.clone(),
                s.y,
                s.x_codes.iter().map(|(&c, &v)| (c, v)).collect(),
            )
        })
        .collect();
    assert_eq!(originals, loadeds);
}

#[test]
fn save_load_save_is_byte_stable() {
    let mut original = learned_forest();
    let mut first = Vec::new();
    original.save(&mut first).unwrap();

    let mut loaded = Forest::load(first.as_slice()).unwrap();
    let mut second = Vec::new();
    loaded.save(&mut second).unwrap();

    assert_eq!(first, second);
}

#[test]
fn empty_forest_round_trips() {
    let mut empty = Forest::new(5);
    let mut buf = Vec::new();
    empty.save(&mut buf).unwrap();

    let mut loaded = Forest::load(buf.as_slice()).unwrap();
    assert_eq!(loaded.n_trees(), 5);
    assert_eq!(loaded.samples().count(), 0);
    assert!(loaded.validate());
    assert_eq!(loaded.classify(&sample("q", &[1], 0.0)), 0.0);
}

#[test]
fn a_loaded_forest_keeps_learning() {
    let mut original = learned_forest();
    let mut buf = Vec::new();
    original.save(&mut buf).unwrap();

    let mut loaded = Forest::load(buf.as_slice()).unwrap();
    for i in 0..20 {
        loaded.add(sample(&format!("extra{i}"), &[2], 1.0));
        assert!(loaded.remove(&format!("neg{i}")));
    }
    loaded.commit();
    assert!(loaded.validate());
    assert_eq!(loaded.samples().count(), 80 + 20 - 20);
}

#[test]
fn save_commits_pending_changes_first() {
    let mut forest = Forest::new(2);
    forest.add(sample("a", &[1], 1.0));
    // Not committed explicitly.
    let mut buf = Vec::new();
    forest.save(&mut buf).unwrap();

    let mut loaded = Forest::load(buf.as_slice()).unwrap();
    assert_eq!(loaded.samples().count(), 1);
}
