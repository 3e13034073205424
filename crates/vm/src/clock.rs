//! A simple clock and timer peripheral.
//!
//! Interrupt operations select on `R0`: `0` stores the interrupt message id
//! from `R1`, `1` writes the milliseconds since startup as two 16-bit words
//! at the address in `R1`, and `2` arms a periodic timer with the period in
//! `R1` which enqueues the message id on every tick.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, tick};

use crate::device::{Device, DeviceId, IntSender};
use crate::error::VmError;
use crate::memory::{Memory, R0, R1};

/// Known interrupt operations.
pub const SET_INT_ID: i64 = 0;
pub const UPTIME: i64 = 1;
pub const SET_TIMER: i64 = 2;

/// An idle timer ticks this rarely; arming a real period replaces it.
const IDLE_PERIOD: Duration = Duration::from_secs(3600);

#[derive(Default)]
pub struct Clock {
    worker: Option<Worker>,
    start: Option<Instant>,
}

struct Worker {
    handle: JoinHandle<()>,
    stop: Sender<()>,
    new_timer: Sender<Duration>,
    int_id: Sender<u16>,
}

impl Clock {
    pub fn new() -> Clock {
        Clock::default()
    }
}

impl Device for Clock {
    fn id(&self) -> DeviceId {
        DeviceId::new(0xfffe, 0x0005)
    }

    fn startup(&mut self, int: IntSender) -> Result<(), VmError> {
        self.start = Some(Instant::now());

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let (timer_tx, timer_rx) = crossbeam_channel::bounded(1);
        let (id_tx, id_rx) = crossbeam_channel::bounded(1);

        let handle = std::thread::spawn(move || poll(int, stop_rx, timer_rx, id_rx));
        self.worker = Some(Worker {
            handle,
            stop: stop_tx,
            new_timer: timer_tx,
            int_id: id_tx,
        });
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), VmError> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            worker.handle.join().map_err(|_| VmError::Device {
                id: self.id().to_string(),
                message: "timer worker panicked".into(),
            })?;
        }
        self.start = None;
        Ok(())
    }

    fn interrupt(&mut self, memory: &mut Memory) {
        let Some(worker) = &self.worker else { return };

        match memory.get_u16(R0 as i64) {
            SET_INT_ID => {
                let _ = worker.int_id.send(memory.get_u16(R1 as i64) as u16);
            }
            UPTIME => {
                let ms = self
                    .start
                    .map(|s| s.elapsed().as_millis() as i64)
                    .unwrap_or(0);
                let addr = memory.get_u16(R1 as i64);
                memory.set_u16(addr, (ms >> 16) & 0xffff);
                memory.set_u16(addr + 2, ms & 0xffff);
            }
            SET_TIMER => {
                let period = Duration::from_millis(memory.get_u16(R1 as i64) as u64);
                let _ = worker.new_timer.send(period);
            }
            _ => {}
        }
    }
}

/// Worker loop: triggers periodic hardware interrupts while a timer is
/// armed and a non-zero message id is set.
fn poll(int: IntSender, stop: Receiver<()>, new_timer: Receiver<Duration>, ids: Receiver<u16>) {
    let mut ticker = tick(IDLE_PERIOD);
    let mut int_id = 0u16;

    loop {
        crossbeam_channel::select! {
            recv(stop) -> _ => return,
            recv(new_timer) -> period => {
                if let Ok(period) = period {
                    ticker = tick(period.max(Duration::from_millis(1)));
                }
            }
            recv(ids) -> id => {
                if let Ok(id) = id {
                    int_id = id;
                }
            }
            recv(ticker) -> _ => {
                if int_id > 0 {
                    int.send(int_id);
                }
            }
        }
    }
}
