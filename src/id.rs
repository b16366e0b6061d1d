use parking_lot::Mutex;

static SHARED: RequestIdAllocator = RequestIdAllocator::new();

/// Hands out FastCGI request ids from a single lock-protected counter.
///
/// Ids increase by one per call. After `u16::MAX - 1` the counter wraps to 0, which is a valid id.
/// Once it wraps, an id may come around again while an older request using it is still in flight
/// on another connection; use separate allocators per connection if that matters.
#[derive(Debug)]
pub struct RequestIdAllocator {
    current: Mutex<u16>,
}

impl RequestIdAllocator {
    pub const fn new() -> RequestIdAllocator {
        RequestIdAllocator::starting_after(0)
    }

    /// The first id handed out will be the one following `last`.
    pub const fn starting_after(last: u16) -> RequestIdAllocator {
        RequestIdAllocator {
            current: Mutex::new(last),
        }
    }

    /// The allocator used by requests that aren't given one explicitly.
    pub fn shared() -> &'static RequestIdAllocator {
        &SHARED
    }

    pub fn next_id(&self) -> u16 {
        let mut current = self.current.lock();
        *current = current.wrapping_add(1);
        if *current == u16::MAX {
            *current = 0;
        }
        *current
    }
}

impl Default for RequestIdAllocator {
    fn default() -> RequestIdAllocator {
        RequestIdAllocator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn sequential() {
        let ids = RequestIdAllocator::new();
        assert_eq!(1, ids.next_id());
        assert_eq!(2, ids.next_id());
        assert_eq!(3, ids.next_id());
    }

    #[test]
    fn wraps_to_zero() {
        let ids = RequestIdAllocator::starting_after(u16::MAX - 2);
        assert_eq!(u16::MAX - 1, ids.next_id());
        assert_eq!(0, ids.next_id());
        assert_eq!(1, ids.next_id());

        let odd = RequestIdAllocator::starting_after(u16::MAX);
        assert_eq!(0, odd.next_id());
    }

    #[test]
    fn unique_across_threads() {
        let ids = Arc::new(RequestIdAllocator::new());
        let threads: Vec<_> = (0..8).map(|_| {
            let ids = ids.clone();
            thread::spawn(move || (0..1000).map(|_| ids.next_id()).collect::<Vec<u16>>())
        }).collect();

        let mut seen = HashSet::new();
        for t in threads {
            for id in t.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(8000, seen.len());
        assert_eq!(8001, ids.next_id());
    }

    #[test]
    fn full_cycle_does_not_panic() {
        let ids = RequestIdAllocator::new();
        let mut seen = HashSet::new();
        for _ in 0..u16::MAX {
            seen.insert(ids.next_id());
        }
        // 1..=65534 then 0: every value but u16::MAX, each exactly once.
        assert_eq!(u16::MAX as usize, seen.len());
        assert!(!seen.contains(&u16::MAX));
        assert_eq!(1, ids.next_id());
    }

    #[test]
    fn independent_allocators() {
        let a = RequestIdAllocator::new();
        let b = RequestIdAllocator::new();
        assert_eq!(1, a.next_id());
        assert_eq!(2, a.next_id());
        assert_eq!(1, b.next_id());
    }
}
