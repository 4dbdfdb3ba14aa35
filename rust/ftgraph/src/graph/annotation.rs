use crate::errors::{
    FtGraphError,
    Result,
};
use std::any::{
    Any,
    TypeId,
    type_name,
};
use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;

/// Values that can live in an annotation slot. The blanket impl covers every
/// cloneable type, the `clone_boxed` indirection keeps graphs deep-copyable
/// even though slots are type-erased.
pub trait AnnotationValue: Any + Debug + Send + Sync {
    fn clone_boxed(&self) -> Box<dyn AnnotationValue>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> AnnotationValue for T
where
    T: Any + Debug + Send + Sync + Clone,
{
    fn clone_boxed(&self) -> Box<dyn AnnotationValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Clone for Box<dyn AnnotationValue> {
    fn clone(&self) -> Self {
        (**self).clone_boxed()
    }
}

/// Per-node annotation slots. Nodes grow their slot vector lazily so a
/// registry registered after node creation still works.
#[derive(Debug, Clone, Default)]
pub(crate) struct AnnotationValues {
    slots: Vec<Option<Box<dyn AnnotationValue>>>,
}

impl AnnotationValues {
    pub(crate) fn get(&self, slot: usize) -> Option<&dyn AnnotationValue> {
        self.slots.get(slot).and_then(|v| v.as_deref())
    }

    pub(crate) fn get_mut(&mut self, slot: usize) -> Option<&mut dyn AnnotationValue> {
        match self.slots.get_mut(slot) {
            Some(Some(v)) => Some(v.as_mut()),
            _ => None,
        }
    }

    pub(crate) fn set(&mut self, slot: usize, value: Option<Box<dyn AnnotationValue>>) {
        if self.slots.len() <= slot {
            self.slots.resize_with(slot + 1, || None);
        }
        self.slots[slot] = value;
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotEntry {
    slot: usize,
    alias: bool,
    type_name: &'static str,
}

/// Maps annotation types to slot indices. One registry per node kind
/// (fragments, losses) and per graph, so slot indices are only meaningful
/// within the graph that issued them.
#[derive(Debug, Clone, Default)]
pub struct AnnotationRegistry {
    entries: HashMap<TypeId, SlotEntry>,
    capacity: usize,
}

impl AnnotationRegistry {
    pub fn slot_of<T: 'static>(&self) -> Option<usize> {
        self.entries.get(&TypeId::of::<T>()).map(|e| e.slot)
    }

    pub fn is_alias<T: 'static>(&self) -> bool {
        self.entries
            .get(&TypeId::of::<T>())
            .map(|e| e.alias)
            .unwrap_or(false)
    }

    /// Registers a fresh slot for T. Fails if T already has one.
    pub fn register<T: 'static>(&mut self) -> Result<usize> {
        if self.entries.contains_key(&TypeId::of::<T>()) {
            return Err(FtGraphError::AnnotationAlreadyRegistered {
                type_name: type_name::<T>(),
            });
        }
        let slot = self.capacity;
        self.capacity += 1;
        self.entries.insert(
            TypeId::of::<T>(),
            SlotEntry {
                slot,
                alias: false,
                type_name: type_name::<T>(),
            },
        );
        Ok(slot)
    }

    pub fn get_or_register<T: 'static>(&mut self) -> usize {
        if let Some(slot) = self.slot_of::<T>() {
            return slot;
        }
        let slot = self.capacity;
        self.capacity += 1;
        self.entries.insert(
            TypeId::of::<T>(),
            SlotEntry {
                slot,
                alias: false,
                type_name: type_name::<T>(),
            },
        );
        slot
    }

    /// Lets lookups under `Alias` resolve to the slot registered for
    /// `Target`. Both types must share a representation; the registry only
    /// forwards the index.
    pub fn alias<Alias: 'static, Target: 'static>(&mut self) -> Result<usize> {
        let target = self.entries.get(&TypeId::of::<Target>()).copied().ok_or(
            FtGraphError::MissingAnnotation {
                type_name: type_name::<Target>(),
                context: "alias target must be registered first",
            },
        )?;
        if self.entries.contains_key(&TypeId::of::<Alias>()) {
            return Err(FtGraphError::AnnotationAlreadyRegistered {
                type_name: type_name::<Alias>(),
            });
        }
        self.entries.insert(
            TypeId::of::<Alias>(),
            SlotEntry {
                slot: target.slot,
                alias: true,
                type_name: type_name::<Alias>(),
            },
        );
        Ok(target.slot)
    }

    /// Removes the mapping for T. Returns the freed slot index and whether
    /// it was an alias; for aliases the underlying slot stays live.
    pub fn remove<T: 'static>(&mut self) -> Option<(usize, bool)> {
        self.entries
            .remove(&TypeId::of::<T>())
            .map(|e| (e.slot, e.alias))
    }

    /// Number of slots ever issued. Node slot vectors never need to be
    /// larger than this.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn registered_type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.values().map(|e| e.type_name)
    }
}

/// Typed handle into the fragment annotation table of one graph.
pub struct FragmentAnnotation<T> {
    pub(crate) slot: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FragmentAnnotation<T> {
    pub(crate) fn new(slot: usize) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for FragmentAnnotation<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FragmentAnnotation<T> {}

impl<T> Debug for FragmentAnnotation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FragmentAnnotation(slot {})", self.slot)
    }
}

/// Typed handle into the loss annotation table of one graph.
pub struct LossAnnotation<T> {
    pub(crate) slot: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> LossAnnotation<T> {
    pub(crate) fn new(slot: usize) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for LossAnnotation<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for LossAnnotation<T> {}

impl<T> Debug for LossAnnotation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LossAnnotation(slot {})", self.slot)
    }
}

/// Heterogeneous map keyed by type, used for graph-level and input-level
/// annotations. At most one value per type.
#[derive(Debug, Clone, Default)]
pub struct TypedRegistry {
    map: HashMap<TypeId, Box<dyn AnnotationValue>>,
}

impl TypedRegistry {
    pub fn get<T: AnnotationValue>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|v| (**v).as_any().downcast_ref::<T>())
    }

    pub fn get_mut<T: AnnotationValue>(&mut self) -> Option<&mut T> {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| (**v).as_any_mut().downcast_mut::<T>())
    }

    pub fn get_or_err<T: AnnotationValue>(&self, context: &'static str) -> Result<&T> {
        self.get::<T>().ok_or(FtGraphError::MissingAnnotation {
            type_name: type_name::<T>(),
            context,
        })
    }

    pub fn get_or_insert_with<T: AnnotationValue>(&mut self, default: impl FnOnce() -> T) -> &mut T {
        let v = self
            .map
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(default()));
        (**v)
            .as_any_mut()
            .downcast_mut::<T>()
            .unwrap_or_else(|| panic!("annotation slot holds a value of the wrong type"))
    }

    pub fn set<T: AnnotationValue>(&mut self, value: T) {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn remove<T: AnnotationValue>(&mut self) -> bool {
        self.map.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn contains<T: AnnotationValue>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
