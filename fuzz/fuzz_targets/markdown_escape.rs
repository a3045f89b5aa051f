#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_router::render_helpers::escape_markdown_v2;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let escaped = escape_markdown_v2(&raw);
    assert!(escaped.len() >= raw.len());
    let unescaped = unescape(&escaped);
    assert_eq!(unescaped, raw);
});

fn unescape(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}
