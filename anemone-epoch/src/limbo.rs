use crossbeam_queue::SegQueue;

use anemone_remote::RemotePtr;

/// The number of limbo generations a retired pointer ages through.
pub const GENERATIONS: usize = 3;

/// One thread's retirement queues, one per generation.
///
/// Generations are addressed by `epoch % 3`: a pointer retired while the
/// global epoch is `e` lands in queue `e % 3` and is drained back to the
/// free pool when the global epoch reaches `e + 2` - at least two full
/// advances after retirement. The handle is shared with the maintenance
/// worker, which retires unlinked nodes into a specific thread's queues in
/// round-robin.
pub struct LimboLists<T> {
    generations: [SegQueue<RemotePtr<T>>; GENERATIONS],
}

impl<T> LimboLists<T> {
    pub(crate) fn new() -> Self {
        LimboLists {
            generations: [SegQueue::new(), SegQueue::new(), SegQueue::new()],
        }
    }

    /// Retire `ptr` into the generation active at `epoch`.
    ///
    /// `epoch` must be the global epoch the caller observed during its
    /// current operation. The observation may lag one advance behind the
    /// true epoch; the generation arithmetic keeps such a pointer in limbo
    /// one rotation longer, never shorter.
    pub fn retire_at(&self, epoch: u64, ptr: RemotePtr<T>) {
        debug_assert!(!ptr.is_null(), "retiring a null pointer");
        self.generations[(epoch % GENERATIONS as u64) as usize].push(ptr);
    }

    /// Drain the generation that has aged out at `new_epoch` into `out`.
    ///
    /// The drained queue is `(new_epoch + 1) % 3`: retirements from epoch
    /// `new_epoch - 2`. Concurrent retirers can observe at most `new_epoch`
    /// itself, so they never push into the queue being drained.
    pub(crate) fn drain_expired(&self, new_epoch: u64, out: &SegQueue<RemotePtr<T>>) {
        let expired = &self.generations[((new_epoch + 1) % GENERATIONS as u64) as usize];
        while let Some(ptr) = expired.pop() {
            out.push(ptr);
        }
    }

    /// Pop every pointer still in limbo, oldest generation first.
    pub(crate) fn drain_all(&self) -> Vec<RemotePtr<T>> {
        let mut all = Vec::new();
        for generation in &self.generations {
            while let Some(ptr) = generation.pop() {
                all.push(ptr);
            }
        }
        all
    }

    /// Total pointers currently in limbo (approximate under concurrency).
    pub fn len(&self) -> usize {
        self.generations.iter().map(|g| g.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
