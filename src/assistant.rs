//! Background decompression assistant (`spec.md` §4.7): a single worker
//! thread that decodes tile payloads off the calling thread, so a
//! read-ahead can be submitted without blocking the caller.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use crate::error::GvrsResult;
use crate::tile::Tile;

type Job = Box<dyn FnOnce() -> GvrsResult<Tile> + Send>;

struct State {
    queue: VecDeque<(u32, Job)>,
    results: HashMap<u32, GvrsResult<Tile>>,
    stop: bool,
}

/// Runs one decompression job at a time on a dedicated thread, handing
/// finished tiles back through a result map guarded by the same lock the
/// queue uses.
pub struct BackgroundDecompressor {
    shared: Arc<(Mutex<State>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundDecompressor {
    #[must_use]
    pub fn new() -> Self {
        let shared = Arc::new((
            Mutex::new(State {
                queue: VecDeque::new(),
                results: HashMap::new(),
                stop: false,
            }),
            Condvar::new(),
        ));
        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("gvrs-decompress".into())
            .spawn(move || worker_loop(&worker_shared))
            .expect("failed to spawn background decompression thread");
        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Queues `job` under `tile_index`, returning immediately. The worker
    /// thread picks it up on its own schedule.
    pub fn submit(&self, tile_index: u32, job: impl FnOnce() -> GvrsResult<Tile> + Send + 'static) {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        state.queue.push_back((tile_index, Box::new(job)));
        cvar.notify_all();
    }

    /// Returns every result that has finished since the last call, without
    /// blocking.
    pub fn drain(&self) -> Vec<(u32, GvrsResult<Tile>)> {
        let (lock, _cvar) = &*self.shared;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        state.results.drain().collect()
    }

    /// Blocks until `tile_index`'s job has finished, then returns its
    /// result.
    pub fn wait_for(&self, tile_index: u32) -> GvrsResult<Tile> {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = state.results.remove(&tile_index) {
                return result;
            }
            state = cvar.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Signals the worker to exit and joins it. Idempotent; also run on
    /// `Drop`.
    pub fn stop(&mut self) {
        {
            let (lock, cvar) = &*self.shared;
            let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
            state.stop = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Default for BackgroundDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundDecompressor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Arc<(Mutex<State>, Condvar)>) {
    let (lock, cvar) = &**shared;
    loop {
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if state.stop {
                return;
            }
            if let Some((tile_index, job)) = state.queue.pop_front() {
                drop(state);
                let result = job();
                let mut state2 = lock.lock().unwrap_or_else(PoisonError::into_inner);
                state2.results.insert(tile_index, result);
                cvar.notify_all();
                break;
            }
            state = cvar.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementSpec;

    #[test]
    fn submit_then_wait_for_returns_result() {
        let assistant = BackgroundDecompressor::new();
        let specs = vec![ElementSpec::int32("z", 0, 10, 0).unwrap()];
        assistant.submit(3, move || Ok(Tile::new_fill(3, &specs, 2, 2)));
        let tile = assistant.wait_for(3).unwrap();
        assert_eq!(tile.tile_index(), 3);
    }

    #[test]
    fn drain_collects_finished_jobs_without_blocking() {
        let assistant = BackgroundDecompressor::new();
        for idx in 0..4u32 {
            let specs = vec![ElementSpec::int32("z", 0, 10, 0).unwrap()];
            assistant.submit(idx, move || Ok(Tile::new_fill(idx, &specs, 2, 2)));
        }
        // Give the single worker thread a chance to drain the queue.
        std::thread::sleep(std::time::Duration::from_millis(50));
        let results = assistant.drain();
        assert_eq!(results.len(), 4);
    }
}
