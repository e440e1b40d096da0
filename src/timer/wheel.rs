/// Bucket bookkeeping for the hashed wheel timer.
///
/// The wheel knows nothing about clocks: callers insert items a number of
/// ticks ahead and call `advance` once per tick. An item inserted `n` ticks
/// ahead is returned by the `n`-th following `advance`, however large `n`
/// is compared to the number of buckets.
pub struct TimingWheel<T> {
    buckets: Vec<Vec<WheelEntry<T>>>,
    mask: usize,
    cursor: usize,
    ticks: u64,
    len: usize,
}

struct WheelEntry<T> {
    rounds: u64,
    item: T,
}

impl<T> TimingWheel<T> {
    /// `size` is rounded up to the next power of two.
    pub fn new(size: usize) -> Self {
        let size = size.max(1).next_power_of_two();
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, Vec::new);

        Self {
            buckets,
            mask: size - 1,
            cursor: 0,
            ticks: 0,
            len: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of completed `advance` calls.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn insert(&mut self, item: T, ticks: u64) {
        let ticks = ticks.max(1);
        let size = self.buckets.len() as u64;
        let offset = (ticks % size) as usize;
        let bucket = (self.cursor + offset) & self.mask;
        let rounds = (ticks - 1) / size;

        self.buckets[bucket].push(WheelEntry { rounds, item });
        self.len += 1;
    }

    /// Moves to the next bucket and returns the entries due on this tick.
    pub fn advance(&mut self) -> Vec<T> {
        self.cursor = (self.cursor + 1) & self.mask;
        self.ticks += 1;

        let bucket = &mut self.buckets[self.cursor];
        let mut due = Vec::new();
        let mut i = 0;
        while i < bucket.len() {
            if bucket[i].rounds == 0 {
                due.push(bucket.swap_remove(i).item);
            } else {
                bucket[i].rounds -= 1;
                i += 1;
            }
        }

        self.len -= due.len();
        due
    }

    /// Empties every bucket.
    pub fn drain(&mut self) -> Vec<T> {
        let mut all = Vec::with_capacity(self.len);
        for bucket in &mut self.buckets {
            all.extend(bucket.drain(..).map(|entry| entry.item));
        }
        self.len = 0;
        all
    }
}
