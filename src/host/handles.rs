use std::path::PathBuf;

use super::runtime::{AssemblyId, ContextId, ObjectId, RuntimeTypeId};

/// Generation-tagged reference to a loaded assembly. Unloading the owning context
/// invalidates every handle into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssemblyHandle {
    index: u32,
    generation: u32,
}

impl AssemblyHandle {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Type resolved inside an assembly; valid only while its assembly handle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeHandle {
    pub assembly: AssemblyHandle,
    pub local: RuntimeTypeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyEntry {
    pub id: AssemblyId,
    pub name: String,
    pub context: ContextId,
    pub path: PathBuf,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<AssemblyEntry>,
}

#[derive(Debug, Default)]
pub struct AssemblyArena {
    slots: Vec<Slot>,
}

impl AssemblyArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: AssemblyEntry) -> AssemblyHandle {
        if let Some((index, slot)) = self.slots.iter_mut().enumerate().find(|(_, slot)| slot.entry.is_none()) {
            slot.entry = Some(entry);
            return AssemblyHandle { index: index as u32, generation: slot.generation };
        }
        self.slots.push(Slot { generation: 0, entry: Some(entry) });
        AssemblyHandle { index: (self.slots.len() - 1) as u32, generation: 0 }
    }

    pub fn get(&self, handle: AssemblyHandle) -> Option<&AssemblyEntry> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn contains(&self, handle: AssemblyHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Empties every slot held by `context`, bumping its generation. Returns how many were released.
    pub fn release_context(&mut self, context: ContextId) -> usize {
        let mut released = 0;
        for slot in &mut self.slots {
            if slot.entry.as_ref().is_some_and(|entry| entry.context == context) {
                slot.entry = None;
                slot.generation = slot.generation.wrapping_add(1);
                released += 1;
            }
        }
        released
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Instance created through the host; empty when creation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManagedObject {
    inner: Option<(ObjectId, TypeHandle)>,
}

impl ManagedObject {
    pub fn new(object: ObjectId, type_handle: TypeHandle) -> Self {
        Self { inner: Some((object, type_handle)) }
    }

    pub const fn empty() -> Self {
        Self { inner: None }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        self.inner.map(|(object, _)| object)
    }

    pub fn type_handle(&self) -> Option<TypeHandle> {
        self.inner.map(|(_, handle)| handle)
    }
}
