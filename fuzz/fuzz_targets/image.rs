#![no_main]

use libfuzzer_sys::fuzz_target;
use refremap::metadata::module::ModuleDef;

fuzz_target!(|data: &[u8]| {
    if let Ok(module) = ModuleDef::from_mem(data.to_vec()) {
        let _ = module.to_bytes();
    }
});
