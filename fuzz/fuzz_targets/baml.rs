#![no_main]

use libfuzzer_sys::fuzz_target;
use refremap::{baml::BamlDocument, metadata::resources::ResourceSet};

fuzz_target!(|data: &[u8]| {
    if let Ok(document) = BamlDocument::parse(data) {
        let _ = document.to_bytes();
    }
    let _ = ResourceSet::parse(data);
});
