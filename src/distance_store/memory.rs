use super::{check_run, condensed_len, DistanceStore, StoreBackend};
use crate::Result;
use std::sync::atomic::{AtomicU64, Ordering};

/// Distance store held in memory.
///
/// Each slot is an `AtomicU64` carrying the bits of an `f64`, which lets workers write their own
/// disjoint slots through a shared reference. Relaxed ordering is enough: phases are separated by
/// a thread join.
pub struct MemoryStore {
    n: usize,
    cells: Vec<AtomicU64>,
}

impl MemoryStore {
    pub fn new(n: usize) -> Self {
        let cells = (0..condensed_len(n)).map(|_| AtomicU64::new(0)).collect();
        MemoryStore { n, cells }
    }
}

impl DistanceStore for MemoryStore {
    fn n(&self) -> usize {
        self.n
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    fn read_run(&self, start: usize, out: &mut [f64]) -> Result<()> {
        check_run(start, out.len(), self.cells.len())?;
        for (value, cell) in out.iter_mut().zip(&self.cells[start..]) {
            *value = f64::from_bits(cell.load(Ordering::Relaxed));
        }
        Ok(())
    }

    fn write_run(&self, start: usize, values: &[f64]) -> Result<()> {
        check_run(start, values.len(), self.cells.len())?;
        for (value, cell) in values.iter().zip(&self.cells[start..]) {
            cell.store(value.to_bits(), Ordering::Relaxed);
        }
        Ok(())
    }
}
