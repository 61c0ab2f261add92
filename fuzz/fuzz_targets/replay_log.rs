#![no_main]

use exposure::replay::{ReplayLog, ReplaySource};
use exposure::store::TraceStore;
use exposure::tracer::{Tracer, TracerConfig};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    // Arbitrary logs may be rejected or unbalanced, but must never panic
    if let Ok(json) = std::str::from_utf8(data) {
        if let Ok(log) = ReplayLog::from_json(json) {
            let store = Arc::new(TraceStore::new());
            if let Ok(mut tracer) =
                Tracer::new(TracerConfig::default(), ReplaySource::new(&log), store.clone())
            {
                if tracer.start().is_ok() {
                    let _ = tracer.source().run();
                    let _ = tracer.stop();
                }
            }
            let _ = store.take_finished();
        }
    }
});
