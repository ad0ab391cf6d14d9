#![no_main]

use libfuzzer_sys::fuzz_target;

use flowbag_aggbag::read_bag;

fuzz_target!(|data: &[u8]| {
    if let Ok(bag) = read_bag(data, None) {
        // 키 순서 순회가 끝까지 가능해야 함
        let _ = bag.iter().count();
    }
});
