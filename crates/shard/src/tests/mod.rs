mod single_tests;

use crate::SeqGenerator;
use std::path::Path;
use std::sync::Arc;

pub fn seq_gen() -> Arc<SeqGenerator> {
    Arc::new(SeqGenerator::new())
}

pub fn dir_names(parent: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(parent)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
