//! Query sample library interface and working-set cache control
//!
//! The library owns the input tensors; the load generator only decides which
//! sample indices must be resident and asks the library to load or unload
//! them. The working set never exceeds `performance_sample_count` samples.
//!
//! Performance runs use one fixed window: the seeded shuffle of the working
//! set, loaded before warmup and unloaded at teardown. Accuracy runs walk the
//! whole library, so the controller precomputes successive windows over the
//! shuffled library and rotates them through a dedicated loader thread. At
//! most one rotation is in flight at a time; the loader communicates with the
//! scheduler over a single-producer single-consumer channel.

use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::settings::EffectiveSettings;
use crate::types::{Mode, SampleIndex};

// ============================================================================
// Library interface
// ============================================================================

/// External owner of the input data.
///
/// `load_samples_to_ram` and `unload_samples_from_ram` are blocking; the
/// controller only calls them from its loader thread or before the run
/// starts, never from the issue scheduler.
pub trait QuerySampleLibrary: Send + Sync {
    /// Total number of samples the library can serve.
    fn total_sample_count(&self) -> u64;

    /// Number of samples that fit the in-memory working set.
    fn performance_sample_count(&self) -> u64;

    /// Make the given samples resident.
    fn load_samples_to_ram(&self, samples: &[SampleIndex]);

    /// Release the given samples.
    fn unload_samples_from_ram(&self, samples: &[SampleIndex]);
}

/// Uniform permutation of `[0, count)` drawn from the library-shuffle seed.
///
/// Stable for a fixed seed; this is the order in which library samples enter
/// working-set windows.
#[must_use]
pub fn library_permutation(seed: u64, count: u64) -> Vec<SampleIndex> {
    let mut indices: Vec<SampleIndex> = (0..count).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    indices
}

/// Plan the sequence of working-set windows for a run.
///
/// Performance runs get a single window: the shuffled working set. Accuracy
/// runs cover the whole library in windows of `performance_sample_count`
/// samples each (last window possibly short).
#[must_use]
pub fn plan_windows(settings: &EffectiveSettings, total_sample_count: u64) -> Vec<Vec<SampleIndex>> {
    let set_size = settings.performance_sample_count.max(1) as usize;
    match settings.mode {
        Mode::AccuracyOnly => {
            let shuffled = library_permutation(settings.qsl_rng_seed, total_sample_count);
            let mut windows: Vec<Vec<SampleIndex>> = shuffled
                .chunks(set_size)
                .map(<[SampleIndex]>::to_vec)
                .collect();
            if windows.is_empty() {
                windows.push(Vec::new());
            }
            windows
        }
        _ => vec![library_permutation(
            settings.qsl_rng_seed,
            settings.performance_sample_count,
        )],
    }
}

// ============================================================================
// Cache controller
// ============================================================================

enum LoaderRequest {
    /// Load `load`, then unload `unload`, then ack.
    Rotate {
        load: Arc<Vec<SampleIndex>>,
        unload: Option<Arc<Vec<SampleIndex>>>,
    },
    Shutdown,
}

/// Rotates working-set windows through the external library.
///
/// The controller owns the loader thread. `load_initial` blocks until the
/// first window is resident; `begin_rotation` kicks off the next window
/// asynchronously and `finish_rotation` joins it. SingleStream and all
/// performance-mode runs have exactly one window and never rotate.
pub struct CacheController {
    windows: Vec<Arc<Vec<SampleIndex>>>,
    active: usize,
    rotation_in_flight: bool,
    tx: Sender<LoaderRequest>,
    ack_rx: Receiver<()>,
    loader: Option<JoinHandle<()>>,
}

impl CacheController {
    /// Build a controller over the planned windows and spawn its loader.
    #[must_use]
    pub fn new(qsl: Arc<dyn QuerySampleLibrary>, windows: Vec<Vec<SampleIndex>>) -> Self {
        let (tx, rx) = mpsc::channel::<LoaderRequest>();
        let (ack_tx, ack_rx): (SyncSender<()>, Receiver<()>) = mpsc::sync_channel(1);
        let loader = std::thread::Builder::new()
            .name("cargar-loader".to_string())
            .spawn(move || {
                while let Ok(request) = rx.recv() {
                    match request {
                        LoaderRequest::Rotate { load, unload } => {
                            tracing::debug!(samples = load.len(), "loading window");
                            qsl.load_samples_to_ram(&load);
                            if let Some(old) = unload {
                                tracing::debug!(samples = old.len(), "unloading window");
                                qsl.unload_samples_from_ram(&old);
                            }
                            let _ = ack_tx.send(());
                        }
                        LoaderRequest::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn loader thread");
        Self {
            windows: windows.into_iter().map(Arc::new).collect(),
            active: 0,
            rotation_in_flight: false,
            tx,
            ack_rx,
            loader: Some(loader),
        }
    }

    /// Number of planned windows.
    #[must_use]
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// The currently resident window.
    #[must_use]
    pub fn active_window(&self) -> Arc<Vec<SampleIndex>> {
        Arc::clone(&self.windows[self.active])
    }

    /// Whether a further window exists beyond the active one.
    #[must_use]
    pub fn has_next_window(&self) -> bool {
        self.active + 1 < self.windows.len()
    }

    /// Load the first window; blocks until the library confirms.
    pub fn load_initial(&mut self) {
        let first = Arc::clone(&self.windows[self.active]);
        let _ = self.tx.send(LoaderRequest::Rotate {
            load: first,
            unload: None,
        });
        let _ = self.ack_rx.recv();
    }

    /// Request the next window asynchronously.
    ///
    /// No-op when a rotation is already in flight or no window remains.
    pub fn begin_rotation(&mut self) {
        if self.rotation_in_flight || !self.has_next_window() {
            return;
        }
        let load = Arc::clone(&self.windows[self.active + 1]);
        let unload = Some(Arc::clone(&self.windows[self.active]));
        let _ = self.tx.send(LoaderRequest::Rotate { load, unload });
        self.rotation_in_flight = true;
    }

    /// Wait for the in-flight rotation and make the next window active.
    ///
    /// Returns the new active window, or `None` when nothing was rotating.
    pub fn finish_rotation(&mut self) -> Option<Arc<Vec<SampleIndex>>> {
        if !self.rotation_in_flight {
            return None;
        }
        let _ = self.ack_rx.recv();
        self.rotation_in_flight = false;
        self.active += 1;
        Some(self.active_window())
    }

    /// Unload the active window and stop the loader thread.
    pub fn shutdown(mut self, qsl: &dyn QuerySampleLibrary) {
        if self.rotation_in_flight {
            let _ = self.ack_rx.recv();
            self.rotation_in_flight = false;
            self.active += 1;
        }
        self.stop_loader();
        qsl.unload_samples_from_ram(&self.windows[self.active]);
    }

    fn stop_loader(&mut self) {
        let _ = self.tx.send(LoaderRequest::Shutdown);
        if let Some(handle) = self.loader.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CacheController {
    fn drop(&mut self) {
        self.stop_loader();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Library stub that records load/unload traffic.
    pub(crate) struct FixedCountLibrary {
        count: u64,
        pub(crate) loads: Mutex<Vec<Vec<SampleIndex>>>,
        pub(crate) unloads: Mutex<Vec<Vec<SampleIndex>>>,
    }

    impl FixedCountLibrary {
        pub(crate) fn new(count: u64) -> Self {
            Self {
                count,
                loads: Mutex::new(Vec::new()),
                unloads: Mutex::new(Vec::new()),
            }
        }
    }

    impl QuerySampleLibrary for FixedCountLibrary {
        fn total_sample_count(&self) -> u64 {
            self.count
        }

        fn performance_sample_count(&self) -> u64 {
            self.count
        }

        fn load_samples_to_ram(&self, samples: &[SampleIndex]) {
            self.loads.lock().expect("lock").push(samples.to_vec());
        }

        fn unload_samples_from_ram(&self, samples: &[SampleIndex]) {
            self.unloads.lock().expect("lock").push(samples.to_vec());
        }
    }

    fn performance_settings(psc: u64) -> EffectiveSettings {
        let requested = crate::settings::RequestedSettings {
            performance_sample_count_override: psc,
            ..crate::settings::RequestedSettings::default()
        };
        let logger = crate::log::AsyncLogger::spawn(Box::new(std::io::sink()));
        let qsl = FixedCountLibrary::new(psc);
        EffectiveSettings::resolve(&requested, &qsl, &logger.sink()).expect("resolve")
    }

    #[test]
    fn test_permutation_is_stable_for_seed() {
        let a = library_permutation(7, 128);
        let b = library_permutation(7, 128);
        assert_eq!(a, b);
    }

    #[test]
    fn test_permutation_differs_across_seeds() {
        let a = library_permutation(7, 128);
        let b = library_permutation(8, 128);
        assert_ne!(a, b);
    }

    #[test]
    fn test_permutation_covers_range() {
        let mut perm = library_permutation(3, 64);
        perm.sort_unstable();
        let expected: Vec<SampleIndex> = (0..64).collect();
        assert_eq!(perm, expected);
    }

    #[test]
    fn test_performance_mode_plans_one_window() {
        let settings = performance_settings(256);
        let windows = plan_windows(&settings, 256);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].len(), 256);
    }

    #[test]
    fn test_accuracy_mode_plans_windows_over_whole_library() {
        let mut settings = performance_settings(100);
        settings.mode = Mode::AccuracyOnly;
        settings.performance_sample_count = 100;
        let windows = plan_windows(&settings, 250);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].len(), 100);
        assert_eq!(windows[2].len(), 50);
        let mut all: Vec<SampleIndex> = windows.into_iter().flatten().collect();
        all.sort_unstable();
        let expected: Vec<SampleIndex> = (0..250).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_initial_load_reaches_library() {
        let qsl = Arc::new(FixedCountLibrary::new(16));
        let windows = vec![vec![3, 1, 2]];
        let mut controller = CacheController::new(Arc::clone(&qsl) as _, windows);
        controller.load_initial();
        assert_eq!(qsl.loads.lock().expect("lock").len(), 1);
        assert_eq!(qsl.loads.lock().expect("lock")[0], vec![3, 1, 2]);
        controller.shutdown(qsl.as_ref());
        assert_eq!(qsl.unloads.lock().expect("lock").len(), 1);
    }

    #[test]
    fn test_rotation_loads_next_and_unloads_previous() {
        let qsl = Arc::new(FixedCountLibrary::new(16));
        let windows = vec![vec![0, 1], vec![2, 3], vec![4, 5]];
        let mut controller = CacheController::new(Arc::clone(&qsl) as _, windows);
        controller.load_initial();

        controller.begin_rotation();
        let next = controller.finish_rotation().expect("rotation");
        assert_eq!(*next, vec![2, 3]);
        {
            let loads = qsl.loads.lock().expect("lock");
            let unloads = qsl.unloads.lock().expect("lock");
            assert_eq!(loads.last().expect("load"), &vec![2, 3]);
            assert_eq!(unloads.last().expect("unload"), &vec![0, 1]);
        }

        controller.begin_rotation();
        let last = controller.finish_rotation().expect("rotation");
        assert_eq!(*last, vec![4, 5]);
        assert!(!controller.has_next_window());
        controller.shutdown(qsl.as_ref());
    }

    #[test]
    fn test_finish_without_begin_is_noop() {
        let qsl = Arc::new(FixedCountLibrary::new(4));
        let mut controller = CacheController::new(Arc::clone(&qsl) as _, vec![vec![0, 1]]);
        controller.load_initial();
        assert!(controller.finish_rotation().is_none());
        controller.shutdown(qsl.as_ref());
    }
}
