use crate::{AddressSpace, Level, PageTable, PageTableEntry, PhysMapper};

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Log every populated entry of this space at `debug` level.
    ///
    /// Leaves are printed as `va -> pa flags`; swap references as
    /// `va -> swap #n`.
    pub fn dump(&self) {
        log::debug!("page tables of {}:", self.root);
        // SAFETY: read-only.
        let root = unsafe { self.table(self.root) };
        self.dump_table(root, Level::Root, 0);
    }

    fn dump_table(&self, table: &PageTable, level: Level, base: u64) {
        for (i, e) in table.iter() {
            if e.is_zero() {
                continue;
            }
            let va = sign_extend(base | ((i as u64) << level.shift()));
            if e.is_table() {
                if let Some(next) = level.next() {
                    log::debug!("{:indent$}{level:?}[{i}] -> table {}", "", e.frame(), indent = depth(level));
                    // SAFETY: read-only.
                    let child = unsafe { self.table(e.frame()) };
                    self.dump_table(child, next, va);
                    continue;
                }
            }
            log_entry(level, va, e);
        }
    }
}

fn log_entry(level: Level, va: u64, e: PageTableEntry) {
    let indent = depth(level);
    if e.valid() {
        log::debug!(
            "{:indent$}{va:#011x} -> {:#011x} {:?} ({level:?})",
            "",
            e.address().as_u64(),
            e.flags(),
        );
    } else {
        log::debug!("{:indent$}{va:#011x} -> swap #{:#x}", "", e.ppn());
    }
}

const fn depth(level: Level) -> usize {
    match level {
        Level::Root => 0,
        Level::Middle => 2,
        Level::Leaf => 4,
    }
}

const fn sign_extend(va: u64) -> u64 {
    if va & (1 << 38) != 0 {
        va | !((1 << 39) - 1)
    } else {
        va
    }
}
