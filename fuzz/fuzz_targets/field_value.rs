#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use flowbag_core::{FieldKind, RenderOptions, parse_field_value, render_field_value};

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    field: u8,
    text: String,
}

fuzz_target!(|input: FuzzInput| {
    let kinds: Vec<FieldKind> = FieldKind::all().collect();
    let kind = kinds[usize::from(input.field) % kinds.len()];
    if let Ok(value) = parse_field_value(kind, &input.text, None) {
        let _ = render_field_value(kind, &value, &RenderOptions::default(), None);
    }
});
