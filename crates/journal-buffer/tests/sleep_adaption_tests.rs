//! Sleep-accuracy fallback, isolated in its own binary because the sleep
//! hook is process-global.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use journal_buffer::test_support::{
    CompletionLog, RecordingObserver, TrackingCallback, install_sleep_hook,
};
use journal_buffer::{BufferConfig, CoalescingBuffer, WriteObserver};

#[test]
fn inaccurate_kernel_sleep_switches_the_timer_to_spinning() {
    let sleep_calls = Arc::new(AtomicU32::new(0));
    let hook_calls = sleep_calls.clone();
    // Simulate a kernel without usable high-resolution sleep: the first
    // eleven sleeps overshoot by 2x, enough failures among the first twenty
    // samples to trip the fallback. Returning a simulated elapsed time also
    // skips the real sleep, keeping the test fast.
    let _guard = install_sleep_hook(move |requested| {
        let n = hook_calls.fetch_add(1, Ordering::SeqCst);
        Some(if n < 11 { requested * 2 } else { requested })
    });

    let buffer = CoalescingBuffer::new(BufferConfig {
        buffer_size_bytes: 1024,
        timeout_nanos: 1_000_000,
        log_rates: false,
    })
    .expect("buffer");
    buffer.start().expect("start");
    let backend = RecordingObserver::new(1_000_000);
    buffer
        .set_observer(Some(backend.clone() as Arc<dyn WriteObserver>))
        .expect("set_observer");
    let log = Arc::new(CompletionLog::default());

    // Drive enough sync cycles for the timer to take its twenty samples.
    let warmup_cycles: u64 = 30;
    for id in 0..warmup_cycles {
        assert!(buffer.check_size(8).expect("check_size"));
        buffer
            .add_record(&[1u8; 8], true, TrackingCallback::boxed(id, log.clone()))
            .expect("add_record");
        assert!(
            backend.wait_for_flushes(id as usize + 1, Duration::from_millis(500)),
            "sync {id} was not flushed"
        );
    }

    assert!(
        sleep_calls.load(Ordering::SeqCst) >= 20,
        "timer never finished its accuracy samples"
    );

    // Let the timer finish any in-flight iteration and park.
    thread::sleep(Duration::from_millis(100));
    let calls_after_warmup = sleep_calls.load(Ordering::SeqCst);

    // Post-fallback the timer must spin: more sync cycles, no more sleeps,
    // and the latency bound still holds.
    for id in warmup_cycles..warmup_cycles + 5 {
        assert!(buffer.check_size(8).expect("check_size"));
        buffer
            .add_record(&[2u8; 8], true, TrackingCallback::boxed(id, log.clone()))
            .expect("add_record");
        assert!(
            backend.wait_for_flushes(id as usize + 1, Duration::from_millis(500)),
            "post-fallback sync {id} was not flushed"
        );
    }
    assert_eq!(
        sleep_calls.load(Ordering::SeqCst),
        calls_after_warmup,
        "timer kept sleeping after the fallback to spin mode"
    );

    buffer.stop().expect("stop");
    assert_eq!(log.done_ids().len(), warmup_cycles as usize + 5);
}
