//! Dining Philosophers on rtos threads.
//!
//! Five philosophers sit at a round table with a fork between each pair of
//! neighbours. Each one alternates between thinking and eating, and needs
//! both adjacent forks to eat. Forks are kernel mutexes; every philosopher
//! picks up the lower-numbered fork first, so no cycle of waiters can form.
//!
//! A waiter thread announces dinner by signaling each philosopher, then
//! joins them all.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{info, LevelFilter};
use rtos::{Mutex, Priority, Task, Thread, ThreadConfig, ThreadResult, Timeout};

const N_PHILO: usize = 5;
const MEALS: u32 = 3;
const DINNER: u32 = 0x1;

static NAMES: [&str; N_PHILO] = ["philo-0", "philo-1", "philo-2", "philo-3", "philo-4"];

struct Table {
    forks: Vec<Mutex<()>>,
    meals: [AtomicU32; N_PHILO],
}

struct Seat {
    table: Arc<Table>,
    id: usize,
}

fn dine(seat: Seat) {
    if let Err(err) = try_dine(&seat) {
        log::error!("philosopher {} left the table: {err}", seat.id);
    }
}

fn try_dine(seat: &Seat) -> ThreadResult<()> {
    Thread::signal_wait(DINNER, Timeout::Forever)?;

    let left = seat.id;
    let right = (seat.id + 1) % N_PHILO;
    let (first, second) = (left.min(right), left.max(right));

    for meal in 1..=MEALS {
        info!("philosopher {} thinking", seat.id);
        Thread::wait(10 + 5 * seat.id as u32)?;

        info!("philosopher {} hungry", seat.id);
        let _first = seat.table.forks[first].lock()?;
        let _second = seat.table.forks[second].lock()?;

        info!("philosopher {} eating meal {meal}", seat.id);
        seat.table.meals[seat.id].fetch_add(1, Ordering::Relaxed);
        Thread::wait(15)?;
    }
    Ok(())
}

fn main() -> ThreadResult<()> {
    rtos_demos::boot(LevelFilter::Info);

    let forks = (0..N_PHILO).map(|_| Mutex::new(())).collect::<ThreadResult<Vec<_>>>()?;
    let table = Arc::new(Table {
        forks,
        meals: Default::default(),
    });

    let mut philosophers = Vec::with_capacity(N_PHILO);
    for (id, name) in NAMES.iter().enumerate() {
        let config = ThreadConfig::builder()
            .name(*name)
            .priority(Priority::Normal)
            .stack_size(2048)
            .build();
        let seat = Seat {
            table: Arc::clone(&table),
            id,
        };
        philosophers.push(Thread::spawn(config, Task::with_arg(dine, seat))?);
    }

    info!("dinner is served");
    for philosopher in &philosophers {
        philosopher.signal_set(DINNER)?;
        info!(
            "{} seated: {:?}, stack {} of {} bytes",
            philosopher.get_name().unwrap_or("?"),
            philosopher.get_state(),
            philosopher.max_stack(),
            philosopher.stack_size()
        );
    }
    for philosopher in &philosophers {
        philosopher.join()?;
    }

    for (id, meals) in table.meals.iter().enumerate() {
        info!("philosopher {id} ate {} meals", meals.load(Ordering::Relaxed));
    }
    log::logger().flush();
    Ok(())
}
