use std::cell::{OnceCell, RefCell};
use std::rc::Rc;

use anyhow::bail;

use crate::noc::event::Nid;

/// Dense-to-sparse endpoint id table shared by every router of a mesh.
///
/// Each router writes the slots `endpoint_start..endpoint_start + my_endpoints` once during
/// bootstrap. The first router to leave bootstrap freezes the table; after that it is
/// read-only.
#[derive(Debug, Default)]
pub struct DenseAddressMap {
    slots: RefCell<Vec<Option<Nid>>>,
    frozen: OnceCell<Box<[Nid]>>,
}

pub type SharedDenseMap = Rc<DenseAddressMap>;

impl DenseAddressMap {
    pub fn shared() -> SharedDenseMap {
        Rc::new(Self::default())
    }

    pub fn insert(&self, dense: usize, sparse: Nid) -> anyhow::Result<()> {
        if self.is_frozen() {
            bail!("dense map is frozen, cannot assign dense id {}", dense);
        }
        let mut slots = self.slots.borrow_mut();
        if slots.len() <= dense {
            slots.resize(dense + 1, None);
        }
        if let Some(existing) = slots[dense] {
            bail!(
                "dense id {} assigned twice (sparse ids {} and {})",
                dense,
                existing,
                sparse
            );
        }
        slots[dense] = Some(sparse);
        Ok(())
    }

    /// Fails if any dense id below the highest assigned one was never written.
    pub fn freeze(&self) -> anyhow::Result<()> {
        if self.is_frozen() {
            return Ok(());
        }
        let slots = self.slots.borrow();
        let table = slots
            .iter()
            .enumerate()
            .map(|(dense, slot)| match slot {
                Some(sparse) => Ok(*sparse),
                None => Err(anyhow::anyhow!("dense id {} was never assigned", dense)),
            })
            .collect::<anyhow::Result<Box<[Nid]>>>()?;
        let _ = self.frozen.set(table);
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get().is_some()
    }

    pub fn lookup(&self, dense: Nid) -> Option<Nid> {
        let index = usize::try_from(dense).ok()?;
        match self.frozen.get() {
            Some(table) => table.get(index).copied(),
            None => self.slots.borrow().get(index).copied().flatten(),
        }
    }

    pub fn len(&self) -> usize {
        match self.frozen.get() {
            Some(table) => table.len(),
            None => self.slots.borrow().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
