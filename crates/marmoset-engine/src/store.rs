//! The indexed memory object table.
//!
//! Every allocation, global or local, is an entry in the per-state
//! object table; pointers carry (object, offset) and all access-history
//! tracking is per cell. Objects are born thread-private (except globals)
//! and become shared when their address escapes to another thread.

use marmoset_ir::GlobalId;

use crate::value::Val;

/// Index into [`Memory::objects`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjId(pub u32);

impl std::fmt::Display for ObjId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "obj{}", self.0)
    }
}

/// Identity of a mutex: the memory cell the program uses as the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId {
    pub obj: ObjId,
    pub offset: i64,
}

impl std::fmt::Display for LockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.obj, self.offset)
    }
}

/// One memory cell. Uninitialized cells are distinct from zero: the first
/// read materializes a fresh nondeterministic value, never a default.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Uninit,
    Val(Val),
}

/// Provenance of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    Global(GlobalId),
    Alloc,
}

/// A memory object: a fixed-size run of cells.
#[derive(Debug, Clone)]
pub struct MemObject {
    pub name: String,
    pub kind: ObjKind,
    pub cells: Vec<Cell>,
    /// Whether another thread can reach this object. Globals always can;
    /// locals only once their address escapes.
    pub shared: bool,
}

impl MemObject {
    pub fn len(&self) -> i64 {
        self.cells.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The common value of all cells, when one exists. Symbolic-offset
    /// reads of such uniform objects are exact.
    pub fn uniform_value(&self) -> Option<&Val> {
        let mut iter = self.cells.iter();
        let first = match iter.next()? {
            Cell::Val(v) => v,
            Cell::Uninit => return None,
        };
        for cell in iter {
            match cell {
                Cell::Val(v) if v == first => {}
                _ => return None,
            }
        }
        Some(first)
    }

    /// True when no cell has ever been written.
    pub fn all_uninit(&self) -> bool {
        self.cells.iter().all(|c| matches!(c, Cell::Uninit))
    }
}

/// The per-state object table.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    objects: Vec<MemObject>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, name: String, kind: ObjKind, cells: usize, zeroed: bool) -> ObjId {
        let fill = if zeroed { Cell::Val(Val::Int(0)) } else { Cell::Uninit };
        self.objects.push(MemObject {
            name,
            kind,
            cells: vec![fill; cells],
            shared: matches!(kind, ObjKind::Global(_)),
        });
        ObjId((self.objects.len() - 1) as u32)
    }

    pub fn object(&self, id: ObjId) -> &MemObject {
        &self.objects[id.0 as usize]
    }

    pub fn object_mut(&mut self, id: ObjId) -> &mut MemObject {
        &mut self.objects[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjId, &MemObject)> {
        self.objects
            .iter()
            .enumerate()
            .map(|(i, o)| (ObjId(i as u32), o))
    }

    /// Mark an object (and every object reachable from its cells) shared.
    pub fn mark_shared(&mut self, root: ObjId) {
        let mut worklist = vec![root];
        while let Some(id) = worklist.pop() {
            let obj = &mut self.objects[id.0 as usize];
            if obj.shared && id != root {
                continue;
            }
            obj.shared = true;
            let reachable: Vec<ObjId> = obj
                .cells
                .iter()
                .filter_map(|c| match c {
                    Cell::Val(Val::Ptr(p)) => Some(p.obj),
                    _ => None,
                })
                .collect();
            for r in reachable {
                if !self.objects[r.0 as usize].shared {
                    worklist.push(r);
                }
            }
        }
    }
}
