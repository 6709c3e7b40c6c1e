/// Opaque handle to something registered in a [`Registry`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

/// Explicit ownership of live instances (timers, transient effects) so a run
/// can tear all of them down in one call instead of tracking them ad hoc.
#[derive(Debug)]
pub struct Registry<T> {
    next_id: u64,
    items: Vec<(Handle, T)>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            items: Vec::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, item: T) -> Handle {
        let handle = Handle(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.items.push((handle, item));
        handle
    }

    #[inline(always)]
    fn position(&self, handle: Handle) -> Option<usize> {
        // Handles are issued in increasing order and items are never reordered.
        self.items.binary_search_by_key(&handle, |(h, _)| *h).ok()
    }

    pub fn unregister(&mut self, handle: Handle) -> Option<T> {
        let i = self.position(handle)?;
        Some(self.items.remove(i).1)
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.position(handle).map(|i| &self.items[i].1)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(Handle, &mut T) -> bool) {
        self.items.retain_mut(|(h, t)| keep(*h, t));
    }

    /// Removes and returns everything, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).map(|(_, t)| t).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::Registry;

    #[test]
    fn handles_stay_valid_across_removals() {
        let mut r = Registry::new();
        let a = r.register("a");
        let b = r.register("b");
        let c = r.register("c");
        assert_eq!(r.unregister(b), Some("b"));
        assert_eq!(r.unregister(b), None, "a handle is only good once");
        assert_eq!(r.get(a), Some(&"a"));
        assert_eq!(r.get(c), Some(&"c"));
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn drain_tears_everything_down_in_order() {
        let mut r = Registry::new();
        for i in 0..5 {
            r.register(i);
        }
        r.retain(|_, v| *v != 2);
        assert_eq!(r.drain(), vec![0, 1, 3, 4]);
        assert!(r.is_empty());
    }
}
