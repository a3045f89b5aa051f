#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_core::{sanitize_prompt, MAX_PROMPT_CHARS};
use relay_router::parse_update_bytes;

fuzz_target!(|data: &[u8]| {
    let Some(event) = parse_update_bytes(data) else {
        return;
    };
    if let Some(text) = event.text.as_deref() {
        let sanitized = sanitize_prompt(text);
        assert!(sanitized.chars().count() <= MAX_PROMPT_CHARS);
        assert_eq!(sanitized, sanitized.trim());
        assert!(!sanitized.contains("  "));
    }
});
