/// Handle into a [`Pool`]. Carries the slot generation so a handle to a
/// freed slot never resolves to whatever occupies it next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

struct Slot<T> {
    generation: u32,
    item: Option<T>,
}

/// Simple object pool for reusable allocations with generation-checked ids.
pub struct Pool<T> {
    items: Vec<Slot<T>>,
    free: Vec<usize>,
    live: usize,
}

impl<T> Pool<T> {
    pub fn with_capacity(cap: usize) -> Self {
        let mut items = Vec::with_capacity(cap);
        let mut free = Vec::with_capacity(cap);
        for i in (0..cap).rev() {
            items.push(Slot {
                generation: 0,
                item: None,
            });
            free.push(i);
        }
        Self {
            items,
            free,
            live: 0,
        }
    }

    /// Store `item`, growing the pool when every slot is taken.
    pub fn alloc(&mut self, item: T) -> SlotId {
        let index = match self.free.pop() {
            Some(idx) => idx,
            None => {
                self.items.push(Slot {
                    generation: 0,
                    item: None,
                });
                self.items.len() - 1
            }
        };
        let slot = &mut self.items[index];
        slot.item = Some(item);
        self.live += 1;
        SlotId {
            index: index as u32,
            generation: slot.generation,
        }
    }

    /// Release a slot. Stale or already-freed ids return `None`.
    pub fn free(&mut self, id: SlotId) -> Option<T> {
        let idx = id.index as usize;
        let slot = self.items.get_mut(idx)?;
        if slot.generation != id.generation {
            return None;
        }
        let item = slot.item.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(idx);
        self.live -= 1;
        Some(item)
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        let slot = self.items.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.item.as_ref()
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    /// Drop every item. Outstanding ids all become stale.
    pub fn clear(&mut self) {
        self.free.clear();
        for (idx, slot) in self.items.iter_mut().enumerate().rev() {
            if slot.item.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(idx);
        }
        self.live = 0;
    }
}
