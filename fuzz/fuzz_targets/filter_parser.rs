#![no_main]

use chokepoint::filter::BottleneckFilter;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // First line is the allow pattern, second the deny pattern, rest an id
    if let Ok(input) = std::str::from_utf8(data) {
        let mut lines = input.splitn(3, '\n');
        let allow = lines.next();
        let deny = lines.next();
        let id = lines.next().unwrap_or("");

        // Must never panic, whatever the patterns
        if let Ok(filter) = BottleneckFilter::from_patterns(allow, deny) {
            let _ = filter.should_survey(id);
        }
    }
});
