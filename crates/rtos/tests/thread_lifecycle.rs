//! Thread lifecycle, signaling and join on the hosted kernel.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use rtos::{
    Priority, SignalEvent, StackAllocator, Status, Task, Thread, ThreadConfig, ThreadError,
    ThreadState, Timeout, DEFAULT_STACK_SIZE, HEAP,
};
use rtos_port::hosted::{self, HostedKernel};

static KERNEL: Lazy<&'static HostedKernel> =
    Lazy::new(|| hosted::init().expect("hosted kernel installs"));

fn kernel() -> &'static HostedKernel {
    *KERNEL
}

const GO: u32 = 0x1;

fn wait_for_go() {
    Thread::signal_wait(GO, Timeout::Forever).expect("go signal");
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < Duration::from_secs(5), "condition never became true");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Heap allocator that counts how often stacks are handed out and returned.
struct CountingAllocator {
    allocated: AtomicUsize,
    released: AtomicUsize,
}

impl CountingAllocator {
    const fn new() -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl StackAllocator for CountingAllocator {
    fn allocate(&self, size: usize) -> Option<std::ptr::NonNull<u8>> {
        self.allocated.fetch_add(1, Ordering::SeqCst);
        HEAP.allocate(size)
    }

    unsafe fn release(&self, ptr: std::ptr::NonNull<u8>, size: usize) {
        self.released.fetch_add(1, Ordering::SeqCst);
        HEAP.release(ptr, size);
    }
}

struct FailingAllocator;

impl StackAllocator for FailingAllocator {
    fn allocate(&self, _size: usize) -> Option<std::ptr::NonNull<u8>> {
        None
    }

    unsafe fn release(&self, _ptr: std::ptr::NonNull<u8>, _size: usize) {
        panic!("nothing was allocated");
    }
}

/// An 8-byte aligned buffer that lives for the rest of the test process.
fn static_stack(bytes: usize) -> &'static mut [u8] {
    let words = Box::leak(vec![0u64; bytes / 8].into_boxed_slice());
    unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), bytes) }
}

#[test]
fn task_runs_once_and_thread_ends_deleted() {
    kernel();
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&counter);

    let mut thread = Thread::new(ThreadConfig::default());
    assert_eq!(thread.get_state(), ThreadState::Inactive);
    thread
        .start(Task::from_closure(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    thread.join().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(thread.get_state(), ThreadState::Deleted);
}

#[test]
fn terminate_stops_busy_thread_on_caller_stack() {
    kernel();
    let started = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&started);

    let config = ThreadConfig::builder()
        .stack_mem(static_stack(512))
        .name("busy")
        .build();
    let thread = Thread::spawn(
        config,
        Task::from_closure(move || {
            flag.store(true, Ordering::SeqCst);
            let mut acc = 0u64;
            for i in 0u64.. {
                acc = std::hint::black_box(acc.wrapping_mul(31).wrapping_add(i));
                if i % 1024 == 0 {
                    let _ = Thread::yield_now();
                }
            }
        }),
    )
    .unwrap();

    wait_until(|| started.load(Ordering::SeqCst));
    assert_eq!(thread.stack_size(), 512);
    thread.terminate().unwrap();
    assert_eq!(thread.get_state(), ThreadState::Deleted);

    let begin = Instant::now();
    thread.join().unwrap();
    assert!(begin.elapsed() < Duration::from_secs(1));
    assert!(thread.used_stack() <= 512);
    assert_eq!(thread.terminate(), Err(ThreadError::InvalidState));
}

#[test]
fn flags_set_before_wait_are_delivered() {
    kernel();
    let barrier = Arc::new(Barrier::new(2));
    let gate = Arc::clone(&barrier);
    let result = Arc::new(spin::Mutex::new(None));
    let slot = Arc::clone(&result);

    let thread = Thread::spawn(
        ThreadConfig::builder().name("receiver").build(),
        Task::from_closure(move || {
            gate.wait();
            *slot.lock() = Some(Thread::signal_wait(0x1, Timeout::NO_WAIT));
        }),
    )
    .unwrap();

    assert_eq!(thread.signal_set(0x1), Ok(0x1));
    barrier.wait();
    thread.join().unwrap();
    assert_eq!(*result.lock(), Some(Ok(SignalEvent::Signaled(0x1))));
}

#[test]
fn signal_round_trip_returns_exact_mask() {
    kernel();
    const MASK: u32 = 0x0000_5A0C;
    let result = Arc::new(spin::Mutex::new(None));
    let slot = Arc::clone(&result);

    let thread = Thread::spawn(
        ThreadConfig::default(),
        Task::from_closure(move || {
            *slot.lock() = Some(Thread::signal_wait(MASK, Timeout::Forever));
        }),
    )
    .unwrap();

    wait_until(|| thread.get_state() == ThreadState::WaitingThreadFlag);
    thread.signal_set(MASK).unwrap();
    thread.join().unwrap();
    assert_eq!(*result.lock(), Some(Ok(SignalEvent::Signaled(MASK))));
}

#[test]
fn zero_mask_waits_for_any_flag() {
    kernel();
    let result = Arc::new(spin::Mutex::new(None));
    let slot = Arc::clone(&result);

    let thread = Thread::spawn(
        ThreadConfig::default(),
        Task::from_closure(move || {
            let first = Thread::signal_wait(0, Timeout::Forever);
            let rest = Thread::signal_wait(0, Timeout::NO_WAIT);
            *slot.lock() = Some((first, rest));
        }),
    )
    .unwrap();

    thread.signal_set(0x40).unwrap();
    thread.join().unwrap();
    assert_eq!(
        *result.lock(),
        Some((Ok(SignalEvent::Signaled(0x40)), Ok(SignalEvent::Empty)))
    );
}

#[test]
fn signal_wait_timeouts() {
    kernel();
    let begin = Instant::now();
    assert_eq!(Thread::signal_wait(0x4, Timeout::NO_WAIT), Ok(SignalEvent::Empty));
    assert!(begin.elapsed() < Duration::from_millis(50));

    let begin = Instant::now();
    assert_eq!(
        Thread::signal_wait(0x4, Timeout::Millis(40)),
        Err(ThreadError::Timeout)
    );
    assert!(begin.elapsed() >= Duration::from_millis(40));
}

#[test]
fn reserved_flag_bit_is_rejected() {
    kernel();
    assert_eq!(
        Thread::signal_wait(0x8000_0000, Timeout::NO_WAIT),
        Err(ThreadError::InvalidParameter)
    );
    assert_eq!(Thread::signal_clr(0x8000_0000), Err(ThreadError::InvalidParameter));
}

#[test]
fn signal_clr_reports_previous_flags() {
    kernel();
    let result = Arc::new(spin::Mutex::new(None));
    let slot = Arc::clone(&result);

    let thread = Thread::spawn(
        ThreadConfig::default(),
        Task::from_closure(move || {
            wait_for_go();
            let before = Thread::signal_clr(0x6);
            let after = Thread::signal_wait(0x8, Timeout::NO_WAIT);
            *slot.lock() = Some((before, after));
        }),
    )
    .unwrap();

    thread.signal_set(0x6 | 0x8).unwrap();
    thread.signal_set(GO).unwrap();
    thread.join().unwrap();
    assert_eq!(
        *result.lock(),
        Some((Ok(0xE), Ok(SignalEvent::Signaled(0x8))))
    );
}

#[test]
fn second_start_is_rejected_without_side_effects() {
    kernel();
    let runs = Arc::new(AtomicUsize::new(0));

    let mut thread = Thread::new(ThreadConfig::default());
    let first = Arc::clone(&runs);
    thread
        .start(Task::from_closure(move || {
            wait_for_go();
            first.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    let id = thread.id();

    let second = Arc::clone(&runs);
    let again = thread.start(Task::from_closure(move || {
        second.fetch_add(100, Ordering::SeqCst);
    }));
    assert_eq!(again, Err(ThreadError::AlreadyStarted));
    assert_eq!(again.unwrap_err().status(), Status::InvalidState);
    assert_eq!(thread.id(), id);

    thread.signal_set(GO).unwrap();
    thread.join().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn unstarted_thread_rejects_operations() {
    kernel();
    let thread = Thread::new(ThreadConfig::builder().name("idle").build());

    assert_eq!(thread.join(), Err(ThreadError::InvalidState));
    assert_eq!(thread.terminate(), Err(ThreadError::InvalidState));
    assert_eq!(thread.set_priority(Priority::High), Err(ThreadError::InvalidState));
    assert_eq!(thread.get_priority(), Err(ThreadError::InvalidState));
    assert_eq!(thread.signal_set(0x1), Err(ThreadError::InvalidState));
    assert_eq!(thread.get_state(), ThreadState::Inactive);
    assert_eq!(thread.stack_size(), 0);
    assert_eq!(thread.free_stack(), 0);
    assert_eq!(thread.used_stack(), 0);
    assert_eq!(thread.max_stack(), 0);
    assert_eq!(thread.get_name(), Some("idle"));
    assert_eq!(thread.id(), None);
}

#[test]
fn cleanup_frees_owned_stack_exactly_once() {
    static JOIN_THEN_DROP: CountingAllocator = CountingAllocator::new();
    static DROP_ONLY: CountingAllocator = CountingAllocator::new();
    static TERMINATE_THEN_DROP: CountingAllocator = CountingAllocator::new();
    kernel();

    let thread = Thread::spawn(
        ThreadConfig::builder().allocator(&JOIN_THEN_DROP).build(),
        Task::new(|| {}),
    )
    .unwrap();
    thread.join().unwrap();
    assert_eq!(JOIN_THEN_DROP.released(), 1);
    thread.join().unwrap();
    drop(thread);
    assert_eq!(JOIN_THEN_DROP.released(), 1);
    assert_eq!(JOIN_THEN_DROP.allocated.load(Ordering::SeqCst), 1);

    let thread = Thread::spawn(
        ThreadConfig::builder().allocator(&DROP_ONLY).build(),
        Task::new(|| {}),
    )
    .unwrap();
    wait_until(|| thread.get_state() == ThreadState::Deleted);
    assert_eq!(DROP_ONLY.released(), 0);
    drop(thread);
    assert_eq!(DROP_ONLY.released(), 1);

    let thread = Thread::spawn(
        ThreadConfig::builder().allocator(&TERMINATE_THEN_DROP).build(),
        Task::new(wait_for_go),
    )
    .unwrap();
    thread.terminate().unwrap();
    drop(thread);
    assert_eq!(TERMINATE_THEN_DROP.released(), 1);
}

#[test]
fn dropping_running_thread_terminates_it() {
    kernel();
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);

    let thread = Thread::spawn(
        ThreadConfig::default(),
        Task::from_closure(move || {
            wait_for_go();
            flag.store(true, Ordering::SeqCst);
        }),
    )
    .unwrap();
    wait_until(|| thread.get_state() == ThreadState::WaitingThreadFlag);
    drop(thread);
    assert!(!finished.load(Ordering::SeqCst));
}

#[test]
fn allocation_failure_leaves_thread_unstarted() {
    static FAILING: FailingAllocator = FailingAllocator;
    kernel();

    let mut thread = Thread::new(ThreadConfig::builder().allocator(&FAILING).build());
    let err = thread.start(Task::new(|| {})).unwrap_err();
    assert_eq!(err, ThreadError::OutOfMemory);
    assert_eq!(err.status(), Status::Resource);
    assert_eq!(thread.get_state(), ThreadState::Inactive);
    assert_eq!(thread.join(), Err(ThreadError::InvalidState));
}

#[test]
fn undersized_stacks_are_invalid() {
    kernel();
    let mut tiny = Thread::new(ThreadConfig::builder().stack_size(64).build());
    assert_eq!(tiny.start(Task::new(|| {})), Err(ThreadError::InvalidParameter));

    let mut zero = Thread::new(ThreadConfig::builder().stack_size(0).build());
    assert_eq!(zero.start(Task::new(|| {})), Err(ThreadError::InvalidParameter));

    let mut small_buffer = Thread::new(ThreadConfig::builder().stack_mem(static_stack(120)).build());
    assert_eq!(
        small_buffer.start(Task::new(|| {})),
        Err(ThreadError::InvalidParameter)
    );
    assert_eq!(small_buffer.get_state(), ThreadState::Inactive);
}

#[test]
fn priority_round_trip() {
    kernel();
    let thread = Thread::spawn(
        ThreadConfig::builder().priority(Priority::BelowNormal).build(),
        Task::new(wait_for_go),
    )
    .unwrap();

    assert_eq!(thread.get_priority(), Ok(Priority::BelowNormal));
    thread.set_priority(Priority::High).unwrap();
    assert_eq!(thread.get_priority(), Ok(Priority::High));

    thread.signal_set(GO).unwrap();
    thread.join().unwrap();
    assert_eq!(thread.set_priority(Priority::Low), Err(ThreadError::InvalidState));
}

#[test]
fn stack_queries_while_running() {
    kernel();
    let thread = Thread::spawn(ThreadConfig::default(), Task::new(wait_for_go)).unwrap();

    assert_eq!(thread.stack_size(), DEFAULT_STACK_SIZE);
    assert!(thread.used_stack() > 0);
    assert_eq!(thread.free_stack() + thread.used_stack(), thread.stack_size());
    assert!(thread.max_stack() >= thread.used_stack());

    thread.signal_set(GO).unwrap();
    thread.join().unwrap();
    assert_eq!(thread.stack_size(), 0);
}

#[test]
fn several_joiners_all_return() {
    static TRACKED: CountingAllocator = CountingAllocator::new();
    kernel();

    let thread = Thread::spawn(
        ThreadConfig::builder().allocator(&TRACKED).build(),
        Task::new(wait_for_go),
    )
    .unwrap();

    std::thread::scope(|scope| {
        let joiners: Vec<_> = (0..3).map(|_| scope.spawn(|| thread.join())).collect();
        wait_until(|| thread.get_state() == ThreadState::WaitingThreadFlag);
        thread.signal_set(GO).unwrap();
        for joiner in joiners {
            assert_eq!(joiner.join().unwrap(), Ok(()));
        }
    });
    assert_eq!(TRACKED.released(), 1);
}

#[test]
fn interrupt_context_rules() {
    let k = kernel();
    let thread = Thread::spawn(ThreadConfig::default(), Task::new(wait_for_go)).unwrap();

    k.run_in_isr(|| {
        assert_eq!(thread.join(), Err(ThreadError::InvalidState));
        assert_eq!(Thread::signal_wait(GO, Timeout::NO_WAIT), Err(ThreadError::InvalidState));
        assert_eq!(Thread::signal_clr(GO), Err(ThreadError::InvalidState));
        assert_eq!(Thread::wait(1), Err(ThreadError::InvalidState));
        assert_eq!(Thread::yield_now(), Err(ThreadError::InvalidState));
        assert_eq!(thread.signal_set(GO), Ok(GO));
    });

    thread.join().unwrap();
}

#[test]
fn bound_tasks_receive_their_context() {
    struct Meter {
        readings: AtomicUsize,
    }

    impl Meter {
        fn sample(&self) {
            self.readings.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn add(counter: Arc<AtomicUsize>) {
        counter.fetch_add(5, Ordering::SeqCst);
    }

    kernel();
    let meter = Arc::new(Meter {
        readings: AtomicUsize::new(0),
    });
    let counter = Arc::new(AtomicUsize::new(0));

    let method = Thread::spawn(ThreadConfig::default(), Task::method(Arc::clone(&meter), Meter::sample)).unwrap();
    let with_arg = Thread::spawn(ThreadConfig::default(), Task::with_arg(add, Arc::clone(&counter))).unwrap();
    method.join().unwrap();
    with_arg.join().unwrap();

    assert_eq!(meter.readings.load(Ordering::SeqCst), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 5);
}

#[test]
fn gettid_and_wait_on_calling_thread() {
    kernel();
    let seen = Arc::new(spin::Mutex::new(None));
    let slot = Arc::clone(&seen);

    let thread = Thread::spawn(
        ThreadConfig::default(),
        Task::from_closure(move || {
            let begin = Instant::now();
            Thread::wait(20).unwrap();
            Thread::yield_now().unwrap();
            *slot.lock() = Some((Thread::gettid(), begin.elapsed()));
        }),
    )
    .unwrap();
    thread.join().unwrap();

    let (tid, slept) = seen.lock().take().unwrap();
    assert_eq!(tid, thread.id());
    assert!(slept >= Duration::from_millis(20));
    assert!(Thread::gettid().is_some());
    assert_ne!(Thread::gettid(), thread.id());
}
