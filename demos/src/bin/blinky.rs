//! Blinky on rtos threads.
//!
//! A blinker thread toggles a simulated LED on every tick and stops when it
//! receives the STOP flag. A second thread runs on a caller-supplied stack
//! and is terminated from `main`. Kernel hooks report idle passes and
//! thread exits.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use log::{info, LevelFilter};
use rtos::{Priority, SignalEvent, Task, Thread, ThreadConfig, ThreadError, ThreadId, ThreadResult, Timeout};

const STOP: u32 = 0x1;
const TICK_MS: u32 = 50;

static LED: AtomicBool = AtomicBool::new(false);
static IDLE_PASSES: AtomicU32 = AtomicU32::new(0);

fn on_idle() {
    IDLE_PASSES.fetch_add(1, Ordering::Relaxed);
}

fn on_exit(id: ThreadId) {
    info!("{id:?} exited");
}

fn blink() {
    loop {
        match Thread::signal_wait(STOP, Timeout::Millis(TICK_MS)) {
            Err(ThreadError::Timeout) => {
                let on = !LED.fetch_xor(true, Ordering::Relaxed);
                info!("LED {}", if on { "ON" } else { "OFF" });
            }
            Ok(SignalEvent::Signaled(_)) => break,
            Ok(SignalEvent::Empty) => {}
            Err(err) => {
                log::error!("blinker stopped: {err}");
                break;
            }
        }
    }
}

fn count_forever() {
    let mut count = 0u64;
    loop {
        count = count.wrapping_add(1);
        if count % 20 == 0 {
            log::debug!("counted to {count}");
        }
        if Thread::wait(5).is_err() {
            return;
        }
    }
}

fn main() -> ThreadResult<()> {
    let kernel = rtos_demos::boot(LevelFilter::Info);
    Thread::attach_idle_hook(on_idle);
    Thread::attach_terminate_hook(on_exit);

    let blinker = Thread::spawn(
        ThreadConfig::builder()
            .name("blinker")
            .priority(Priority::AboveNormal)
            .build(),
        Task::new(blink),
    )?;

    let stack: &'static mut [u8] = Box::leak(Box::new([0u8; 1024]));
    let counter = Thread::spawn(
        ThreadConfig::builder().name("counter").stack_mem(stack).build(),
        Task::new(count_forever),
    )?;

    for _ in 0..6 {
        kernel.idle();
        std::thread::sleep(Duration::from_millis(TICK_MS as u64));
    }

    info!(
        "counter is {:?}, using {} of {} stack bytes",
        counter.get_state(),
        counter.used_stack(),
        counter.stack_size()
    );
    counter.terminate()?;
    counter.join()?;

    blinker.signal_set(STOP)?;
    blinker.join()?;

    info!(
        "{} idle passes, LED left {}",
        IDLE_PASSES.load(Ordering::Relaxed),
        if LED.load(Ordering::Relaxed) { "ON" } else { "OFF" }
    );
    log::logger().flush();
    Ok(())
}
