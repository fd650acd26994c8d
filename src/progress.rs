use std::{
    sync::{atomic::AtomicUsize, Mutex},
    time::{Duration, Instant},
};

pub struct ProgressStats {
    pub step: usize,
    pub num_steps: usize,
    /// Time spent reading and decoding chunks.
    pub read: Duration,
    /// Time spent encoding the single chunk.
    pub process: Duration,
    pub write: Duration,
}

pub struct Progress<'a> {
    progress_callback: &'a ProgressCallback<'a>,
    step: AtomicUsize,
    num_steps: usize,
    duration_read: Mutex<Duration>,
    duration_process: Mutex<Duration>,
    duration_write: Mutex<Duration>,
}

impl<'a> Progress<'a> {
    pub fn new(num_steps: usize, progress_callback: &'a ProgressCallback) -> Self {
        let progress: Progress = Self {
            progress_callback,
            step: AtomicUsize::new(0),
            num_steps,
            duration_read: Mutex::new(Duration::ZERO),
            duration_process: Mutex::new(Duration::ZERO),
            duration_write: Mutex::new(Duration::ZERO),
        };
        progress.update(0);
        progress
    }

    pub fn read<F: FnOnce() -> T, T>(&self, f: F) -> T {
        Self::timed(&self.duration_read, f)
    }

    pub fn process<F: FnOnce() -> T, T>(&self, f: F) -> T {
        Self::timed(&self.duration_process, f)
    }

    pub fn write<F: FnOnce() -> T, T>(&self, f: F) -> T {
        Self::timed(&self.duration_write, f)
    }

    fn timed<F: FnOnce() -> T, T>(duration: &Mutex<Duration>, f: F) -> T {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        if let Ok(mut duration) = duration.lock() {
            *duration += elapsed;
        }
        result
    }

    fn duration(duration: &Mutex<Duration>) -> Duration {
        duration.lock().map_or(Duration::ZERO, |duration| *duration)
    }

    fn update(&self, step: usize) {
        let stats = ProgressStats {
            step,
            num_steps: self.num_steps,
            read: Self::duration(&self.duration_read),
            process: Self::duration(&self.duration_process),
            write: Self::duration(&self.duration_write),
        };
        self.progress_callback.update(stats);
    }

    pub fn next(&self) {
        let step = 1 + self.step.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.update(step);
    }
}

fn ignore_progress(_stats: ProgressStats) {}

pub struct ProgressCallback<'a> {
    callback: &'a (dyn Fn(ProgressStats) + Send + Sync),
}

impl<'a> ProgressCallback<'a> {
    pub fn new(callback: &'a (dyn Fn(ProgressStats) + Send + Sync)) -> Self {
        Self { callback }
    }

    /// A callback that ignores progress.
    pub fn none() -> ProgressCallback<'static> {
        ProgressCallback {
            callback: &ignore_progress,
        }
    }

    pub fn update(&self, stats: ProgressStats) {
        (self.callback)(stats);
    }
}
