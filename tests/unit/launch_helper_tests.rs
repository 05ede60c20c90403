//! Pure helpers of the front-end readiness loop.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use mph_session::session::launch::{new_tags, normalize_path};

fn tags(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

#[test]
fn new_tags_are_those_missing_from_snapshot() {
    let snapshot: HashSet<String> = tags(&["Model1", "Model2"]).into_iter().collect();

    assert!(new_tags(&tags(&["Model1", "Model2"]), &snapshot).is_empty());
    assert_eq!(
        new_tags(&tags(&["Model3", "Model1", "Model2"]), &snapshot),
        ["Model3"]
    );
}

#[test]
fn new_tags_are_sorted_and_unique() {
    let snapshot = HashSet::new();
    assert_eq!(
        new_tags(&tags(&["b", "a", "b"]), &snapshot),
        ["a", "b"]
    );
}

#[test]
fn removed_tags_are_not_new() {
    let snapshot: HashSet<String> = tags(&["Model1"]).into_iter().collect();
    assert!(new_tags(&[], &snapshot).is_empty());
}

#[cfg(unix)]
#[test]
fn normalize_resolves_dot_segments() {
    let normalized = normalize_path(Path::new("/work/./models/../beam.mph")).unwrap();
    assert_eq!(normalized, PathBuf::from("/work/beam.mph"));
}

#[test]
fn normalize_makes_relative_paths_absolute() {
    let normalized = normalize_path(Path::new("beam.mph")).unwrap();
    assert!(normalized.is_absolute());
    assert_eq!(
        normalized,
        std::env::current_dir().unwrap().join("beam.mph")
    );
}
