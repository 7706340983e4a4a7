/// Receives notifications while stability selection runs its repetitions.
///
/// Repetitions run on the rayon pool, so `on_repetition_finished` may be called
/// from several threads and not in index order.
pub trait RepetitionObserver: Sync {
    fn on_start(&self, repetitions: usize) {
        let _ = repetitions;
    }

    fn on_repetition_finished(&self, repetition: usize, selected: usize) {
        let _ = (repetition, selected);
    }

    fn on_finish(&self) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRepetitionProgress;

impl RepetitionObserver for NoopRepetitionProgress {}
