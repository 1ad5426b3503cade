use core::fmt;
use core::num::NonZeroU32;
use core::sync::atomic::Ordering::Relaxed;

use crate::cfg::atomic::{AtomicBool, AtomicU32};

/// Encoded value of "no context": an empty queue tail or an unset link.
pub(super) const EMPTY: u32 = 0;

/// A compact, nonzero tag identifying one execution context of an
/// [`OsqNodes`] table.
///
/// The tag is the context index plus one, so that zero stays free to encode an
/// empty queue. Tags are obtained from [`OsqNodes::cpu`] or
/// [`OsqNodes::cpus`] and are only meaningful for a table at least as large as
/// the one that issued them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(NonZeroU32);

impl CpuId {
    /// Returns the context index this tag was built from.
    #[inline]
    pub const fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// Encodes an index, returning `None` if it does not fit a tag.
    #[inline]
    const fn encode(index: usize) -> Option<Self> {
        if index >= u32::MAX as usize {
            return None;
        }
        match NonZeroU32::new(index as u32 + 1) {
            Some(tag) => Some(Self(tag)),
            None => None,
        }
    }

    /// Decodes a raw tag word, mapping [`EMPTY`] to `None`.
    #[inline]
    pub(super) const fn from_raw(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(tag) => Some(Self(tag)),
            None => None,
        }
    }

    /// Returns the raw tag word.
    #[inline]
    pub(super) const fn into_raw(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuId({})", self.index())
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.index(), f)
    }
}

/// Decodes an optional tag back into its raw word.
#[inline]
pub(super) fn raw(cpu: Option<CpuId>) -> u32 {
    cpu.map_or(EMPTY, CpuId::into_raw)
}

/// The queue record owned by one execution context.
///
/// Links are encoded [`CpuId`]s rather than pointers, so a stale link can only
/// ever name another permanent slot of the same table.
pub(super) struct OsqNode {
    /// The successor queued behind this node, or [`EMPTY`].
    pub(super) next: AtomicU32,
    /// The predecessor this node spins behind. Only meaningful while queued.
    pub(super) prev: AtomicU32,
    /// Set by the predecessor to pass the baton.
    pub(super) locked: AtomicBool,
    /// The owning context, written on each join.
    pub(super) id: AtomicU32,
}

impl OsqNode {
    #[cfg(not(all(loom, test)))]
    const fn new() -> Self {
        Self {
            next: AtomicU32::new(EMPTY),
            prev: AtomicU32::new(EMPTY),
            locked: AtomicBool::new(false),
            id: AtomicU32::new(EMPTY),
        }
    }

    #[cfg(all(loom, test))]
    fn new() -> Self {
        Self {
            next: AtomicU32::new(EMPTY),
            prev: AtomicU32::new(EMPTY),
            locked: AtomicBool::new(false),
            id: AtomicU32::new(EMPTY),
        }
    }

    /// Resets the node for a fresh join by context `cpu`.
    pub(super) fn prepare(&self, cpu: CpuId) {
        self.locked.store(false, Relaxed);
        self.next.store(EMPTY, Relaxed);
        self.id.store(cpu.into_raw(), Relaxed);
    }
}

impl fmt::Debug for OsqNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsqNode")
            .field("id", &CpuId::from_raw(self.id.load(Relaxed)))
            .field("prev", &CpuId::from_raw(self.prev.load(Relaxed)))
            .field("next", &CpuId::from_raw(self.next.load(Relaxed)))
            .field("locked", &self.locked.load(Relaxed))
            .finish()
    }
}

/// The fixed table of queue nodes, one per execution context.
///
/// A host creates a single table for its `N` hardware threads when it starts
/// and keeps it for its whole lifetime, typically in a `static`. Every
/// [`OptimisticSpinQueue`] operation borrows the table and the [`CpuId`] of
/// the calling context; no node is ever allocated or freed on the spinning
/// path.
///
/// A context may be queued on at most one queue at a time, and only the
/// context a [`CpuId`] stands for may pass it to a queue operation.
///
/// # Examples
///
/// ```
/// use osqlock::osq::OsqNodes;
///
/// static NODES: OsqNodes<4> = OsqNodes::new();
///
/// assert_eq!(NODES.len(), 4);
/// assert_eq!(NODES.cpu(3).map(|cpu| cpu.index()), Some(3));
/// assert!(NODES.cpu(4).is_none());
/// ```
///
/// [`OptimisticSpinQueue`]: super::OptimisticSpinQueue
pub struct OsqNodes<const N: usize> {
    nodes: [OsqNode; N],
}

impl<const N: usize> OsqNodes<N> {
    /// Creates a table of `N` idle nodes.
    #[cfg(not(all(loom, test)))]
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const IDLE: OsqNode = OsqNode::new();
        Self { nodes: [IDLE; N] }
    }

    /// Creates a table of idle nodes with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    pub(crate) fn new() -> Self {
        Self { nodes: core::array::from_fn(|_| OsqNode::new()) }
    }

    /// Returns the number of execution contexts of this table.
    #[inline]
    pub const fn len(&self) -> usize {
        N
    }

    /// Returns `true` if the table has no execution contexts.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    /// Returns the tag of the context at `index`, or `None` if out of range.
    #[inline]
    pub const fn cpu(&self, index: usize) -> Option<CpuId> {
        if index < N {
            CpuId::encode(index)
        } else {
            None
        }
    }

    /// Returns an iterator over the tags of every context of this table.
    pub fn cpus(&self) -> impl Iterator<Item = CpuId> {
        (0..N).map_while(CpuId::encode)
    }

    /// Returns the node owned by `cpu`.
    ///
    /// # Panics
    ///
    /// Panics if `cpu` was issued by a larger table.
    #[inline]
    pub(super) fn node(&self, cpu: CpuId) -> &OsqNode {
        &self.nodes[cpu.index()]
    }
}

#[cfg(not(all(loom, test)))]
impl<const N: usize> Default for OsqNodes<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for OsqNodes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.nodes.iter()).finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{raw, CpuId, OsqNodes, EMPTY};

    #[test]
    fn tags_are_nonzero_and_round_trip() {
        let nodes = OsqNodes::<8>::new();
        for (index, cpu) in nodes.cpus().enumerate() {
            assert_ne!(cpu.into_raw(), EMPTY);
            assert_eq!(cpu.index(), index);
            assert_eq!(CpuId::from_raw(cpu.into_raw()), Some(cpu));
        }
        assert_eq!(nodes.cpus().count(), 8);
    }

    #[test]
    fn empty_sentinel_decodes_to_none() {
        assert_eq!(CpuId::from_raw(EMPTY), None);
        assert_eq!(raw(None), EMPTY);
    }

    #[test]
    fn out_of_range_index_has_no_tag() {
        let nodes = OsqNodes::<2>::new();
        assert!(nodes.cpu(1).is_some());
        assert!(nodes.cpu(2).is_none());
        assert!(CpuId::encode(u32::MAX as usize).is_none());
    }

    #[test]
    fn prepare_resets_links() {
        let nodes = OsqNodes::<2>::new();
        let cpu = nodes.cpu(1).unwrap();
        let node = nodes.node(cpu);
        node.next.store(1, core::sync::atomic::Ordering::Relaxed);
        node.locked.store(true, core::sync::atomic::Ordering::Relaxed);
        node.prepare(cpu);
        let debug = format!("{node:?}");
        assert_eq!(debug, "OsqNode { id: Some(CpuId(1)), prev: None, next: None, locked: false }");
    }

    #[test]
    #[should_panic]
    fn foreign_tag_panics() {
        let big = OsqNodes::<4>::new();
        let small = OsqNodes::<2>::new();
        let _ = small.node(big.cpu(3).unwrap());
    }
}
