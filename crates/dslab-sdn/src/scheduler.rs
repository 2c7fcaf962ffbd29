//! Packet schedulers sharing channel bandwidth among its transmissions.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::transmission::Transmission;

const EPSILON: f64 = 1e-9;

/// Tracks transmissions of a channel and advances them according to the channel bandwidth.
pub trait PacketScheduler {
    /// Enqueues transmission at the given time.
    fn add_transmission(&mut self, transmission: Transmission, time: f64);

    /// Advances all in-flight transmissions up to `time` at the current bandwidth.
    ///
    /// Completed transmissions are moved to the completed list, transmissions exceeding their timeout
    /// are moved to the failed list. Returns true if any transmission completed.
    fn update_packet_processing(&mut self, time: f64) -> bool;

    /// Returns the bandwidth given to the scheduler.
    fn bandwidth(&self) -> f64;

    /// Sets the bandwidth, progress must be flushed with [`Self::update_packet_processing`] before.
    fn set_bandwidth(&mut self, bandwidth: f64);

    /// Returns the time of the next transmission completion at the current bandwidth.
    fn next_finish_time(&self) -> f64;

    /// Returns the estimated completion time of the packet.
    fn estimate_finish_time(&self, packet_id: u64) -> Option<f64>;

    /// Returns the earliest time an in-flight transmission times out.
    fn next_timeout_time(&self) -> f64;

    /// Returns and clears completed transmissions.
    fn take_completed(&mut self) -> Vec<Transmission>;

    /// Returns and clears failed (timed out) transmissions.
    fn take_failed(&mut self) -> Vec<Transmission>;

    /// Returns in-flight transmissions.
    fn in_flight(&self) -> Vec<&Transmission>;

    /// Returns the number of in-flight transmissions.
    fn in_flight_count(&self) -> usize;

    /// Returns the time progress was last flushed.
    fn last_update_time(&self) -> f64;
}

/// Available packet schedulers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerKind {
    /// [`TimeSharedScheduler`].
    TimeShared,
    /// [`SpaceSharedScheduler`].
    SpaceShared,
}

impl SchedulerKind {
    /// Creates a scheduler with the default transmission timeout.
    pub fn build(&self, default_timeout: Option<f64>) -> Box<dyn PacketScheduler> {
        match self {
            SchedulerKind::TimeShared => Box::new(TimeSharedScheduler::new(default_timeout)),
            SchedulerKind::SpaceShared => Box::new(SpaceSharedScheduler::new(default_timeout)),
        }
    }
}

// Common state ----------------------------------------------------------------------------------------------------------

struct TransmissionQueue {
    bandwidth: f64,
    default_timeout: Option<f64>,
    in_flight: VecDeque<Transmission>,
    completed: Vec<Transmission>,
    failed: Vec<Transmission>,
    last_update_time: f64,
}

impl TransmissionQueue {
    fn new(default_timeout: Option<f64>) -> Self {
        Self {
            bandwidth: 0.,
            default_timeout,
            in_flight: VecDeque::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            last_update_time: 0.,
        }
    }

    fn add(&mut self, mut transmission: Transmission, time: f64) {
        if self.in_flight.is_empty() {
            self.last_update_time = time;
        }
        if transmission.timeout.is_none() {
            transmission.timeout = self.default_timeout;
        }
        self.in_flight.push_back(transmission);
    }

    /// Advances the queue serving at most `concurrency` head transmissions at a time.
    ///
    /// The interval is split at every completion and timeout, so bandwidth released by a finished
    /// transmission is given to the remaining ones for the rest of the interval.
    fn advance(&mut self, time: f64, concurrency: usize) -> bool {
        let completed_before = self.completed.len();
        let mut now = self.last_update_time;
        loop {
            self.expire(now);
            if self.in_flight.is_empty() || now >= time {
                break;
            }
            let served = self.in_flight.len().min(concurrency);
            let rate = self.bandwidth / served as f64;
            let mut step = time - now;
            if rate > 0. {
                for tr in self.in_flight.iter().take(served) {
                    step = step.min(tr.remaining / rate);
                }
            }
            for tr in self.in_flight.iter() {
                step = step.min(tr.deadline() - now);
            }
            step = step.max(0.);
            for tr in self.in_flight.iter_mut().take(served) {
                tr.remaining -= rate * step;
            }
            now = if time - (now + step) <= EPSILON { time } else { now + step };

            let mut i = 0;
            while i < served.min(self.in_flight.len()) {
                if self.in_flight[i].remaining > EPSILON * self.in_flight[i].size().max(1.) {
                    i += 1;
                    continue;
                }
                if let Some(mut tr) = self.in_flight.remove(i) {
                    tr.remaining = 0.;
                    tr.finish_time = Some(now);
                    self.completed.push(tr);
                }
            }
        }
        self.last_update_time = self.last_update_time.max(time);
        self.completed.len() > completed_before
    }

    fn expire(&mut self, now: f64) {
        let mut i = 0;
        while i < self.in_flight.len() {
            if self.in_flight[i].deadline() > now + EPSILON {
                i += 1;
                continue;
            }
            if let Some(mut tr) = self.in_flight.remove(i) {
                tr.finish_time = Some(now);
                log::warn!(
                    "transmission of packet {} ({} -> {}, flow {}) timed out at {:.3} with {} of {} left",
                    tr.packet.id,
                    tr.packet.src,
                    tr.packet.dst,
                    tr.packet.flow,
                    now,
                    tr.remaining,
                    tr.size()
                );
                self.failed.push(tr);
            }
        }
    }

    fn next_timeout_time(&self) -> f64 {
        self.in_flight
            .iter()
            .map(|tr| tr.deadline())
            .fold(f64::INFINITY, f64::min)
    }
}

macro_rules! delegate_queue {
    () => {
        fn add_transmission(&mut self, transmission: Transmission, time: f64) {
            self.queue.add(transmission, time);
        }

        fn bandwidth(&self) -> f64 {
            self.queue.bandwidth
        }

        fn set_bandwidth(&mut self, bandwidth: f64) {
            self.queue.bandwidth = bandwidth;
        }

        fn next_timeout_time(&self) -> f64 {
            self.queue.next_timeout_time()
        }

        fn take_completed(&mut self) -> Vec<Transmission> {
            std::mem::take(&mut self.queue.completed)
        }

        fn take_failed(&mut self) -> Vec<Transmission> {
            std::mem::take(&mut self.queue.failed)
        }

        fn in_flight(&self) -> Vec<&Transmission> {
            self.queue.in_flight.iter().collect()
        }

        fn in_flight_count(&self) -> usize {
            self.queue.in_flight.len()
        }

        fn last_update_time(&self) -> f64 {
            self.queue.last_update_time
        }
    };
}

// Time-shared -----------------------------------------------------------------------------------------------------------

/// Gives the whole bandwidth to the head-of-line transmission, the rest wait in FIFO order.
pub struct TimeSharedScheduler {
    queue: TransmissionQueue,
}

impl TimeSharedScheduler {
    /// Creates scheduler with the timeout applied to transmissions without their own.
    pub fn new(default_timeout: Option<f64>) -> Self {
        Self {
            queue: TransmissionQueue::new(default_timeout),
        }
    }
}

impl PacketScheduler for TimeSharedScheduler {
    delegate_queue!();

    fn update_packet_processing(&mut self, time: f64) -> bool {
        self.queue.advance(time, 1)
    }

    fn next_finish_time(&self) -> f64 {
        match self.queue.in_flight.front() {
            Some(head) if self.queue.bandwidth > 0. => {
                self.queue.last_update_time + head.remaining / self.queue.bandwidth
            }
            _ => f64::INFINITY,
        }
    }

    fn estimate_finish_time(&self, packet_id: u64) -> Option<f64> {
        let mut ahead = 0.;
        for tr in self.queue.in_flight.iter() {
            ahead += tr.remaining;
            if tr.packet.id == packet_id {
                return Some(if self.queue.bandwidth > 0. {
                    self.queue.last_update_time + ahead / self.queue.bandwidth
                } else {
                    f64::INFINITY
                });
            }
        }
        None
    }
}

// Space-shared ----------------------------------------------------------------------------------------------------------

/// Divides the bandwidth equally among all in-flight transmissions.
pub struct SpaceSharedScheduler {
    queue: TransmissionQueue,
}

impl SpaceSharedScheduler {
    /// Creates scheduler with the timeout applied to transmissions without their own.
    pub fn new(default_timeout: Option<f64>) -> Self {
        Self {
            queue: TransmissionQueue::new(default_timeout),
        }
    }
}

impl PacketScheduler for SpaceSharedScheduler {
    delegate_queue!();

    fn update_packet_processing(&mut self, time: f64) -> bool {
        self.queue.advance(time, usize::MAX)
    }

    fn next_finish_time(&self) -> f64 {
        let count = self.queue.in_flight.len();
        if count == 0 || self.queue.bandwidth <= 0. {
            return f64::INFINITY;
        }
        let min_remaining = self
            .queue
            .in_flight
            .iter()
            .map(|tr| tr.remaining)
            .fold(f64::INFINITY, f64::min);
        self.queue.last_update_time + min_remaining * count as f64 / self.queue.bandwidth
    }

    fn estimate_finish_time(&self, packet_id: u64) -> Option<f64> {
        let target = self.queue.in_flight.iter().find(|tr| tr.packet.id == packet_id)?;
        if self.queue.bandwidth <= 0. {
            return Some(f64::INFINITY);
        }
        // transmissions with less data left finish earlier and release their share
        let mut remaining: Vec<f64> = self.queue.in_flight.iter().map(|tr| tr.remaining).collect();
        remaining.sort_by(|a, b| a.total_cmp(b));
        let count = remaining.len();
        let mut elapsed = 0.;
        let mut processed = 0.;
        for (i, r) in remaining.iter().enumerate() {
            elapsed += (r - processed) * (count - i) as f64 / self.queue.bandwidth;
            processed = *r;
            if *r >= target.remaining {
                break;
            }
        }
        Some(self.queue.last_update_time + elapsed)
    }
}
