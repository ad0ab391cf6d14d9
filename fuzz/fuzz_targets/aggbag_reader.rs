#![no_main]

use libfuzzer_sys::fuzz_target;

use flowbag_aggbag::{WriteOptions, read_container, write_aggbag};

fuzz_target!(|data: &[u8]| {
    // 읽기에 성공한 입력은 다시 쓸 수 있어야 함
    if let Ok(container) = read_container(data, None) {
        let bag = container.into_aggbag();
        let mut out = Vec::new();
        write_aggbag(&bag, &mut out, &WriteOptions::default())
            .expect("a decoded container must serialize");
    }
});
