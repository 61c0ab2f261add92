#![no_main]

use exposure::filter::PathFilter;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // First line is the pattern, the rest is a path to match against it
    if let Ok(input) = std::str::from_utf8(data) {
        let (pattern, path) = input.split_once('\n').unwrap_or((input, ""));
        if let Ok(filter) = PathFilter::from_pattern(pattern) {
            // Entry and exit must see the same verdict
            assert_eq!(filter.passes(path), filter.passes(path));
        }
    }
});
