//! C2 — Grid & Domain Model.
//!
//! Canonical, backend-neutral descriptors: grid types, grid instances,
//! domains, stencil indices/ranges, stencil maps, and runs. Descriptors are
//! owned by the `Session` (§9); everything here only holds interned ids or
//! plain data, never a back-reference into the AST.

use std::collections::HashMap;

use crate::ast::Expr;

/// Interned handle to a `GridType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridTypeId(pub u32);

/// Interned handle to a `Grid` instance (one per allocation site).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridId(pub u32);

/// Interned handle to a `StencilMap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StencilMapId(pub u32);

/// Primitive point types (§3 "primitive point type").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Float,
    Double,
    Int,
    Long,
}

/// `PSReduceGrid<T>(out, op, g)`'s operator (§4.5, §6). Folding starts from
/// the type-correct identity named here rather than the first element, so
/// an empty interior (degenerate domain) still yields a defined result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
    Prod,
}

impl ReduceOp {
    pub fn identity_int(&self) -> i64 {
        match self {
            ReduceOp::Sum => 0,
            ReduceOp::Prod => 1,
            ReduceOp::Max => i64::MIN,
            ReduceOp::Min => i64::MAX,
        }
    }

    pub fn identity_float(&self) -> f64 {
        match self {
            ReduceOp::Sum => 0.0,
            ReduceOp::Prod => 1.0,
            ReduceOp::Max => f64::NEG_INFINITY,
            ReduceOp::Min => f64::INFINITY,
        }
    }
}

/// One member of a user-declared record point type.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMember {
    pub name: String,
    pub ty: Primitive,
    /// Non-empty when the member is itself a fixed-size array.
    pub array_shape: Vec<usize>,
}

/// The element layout of a grid type: a bare scalar, or an ordered list of
/// named members (§3).
#[derive(Debug, Clone, PartialEq)]
pub enum PointLayout {
    Primitive(Primitive),
    Record {
        /// Symbolic handle to the element-type definition, e.g. the type's
        /// declared name in the surface language.
        type_name: String,
        members: Vec<RecordMember>,
    },
}

impl PointLayout {
    pub fn is_primitive(&self) -> bool {
        matches!(self, PointLayout::Primitive(_))
    }

    /// Declaration-ordered member lookup, `None` for primitive points.
    pub fn member_index(&self, name: &str) -> Option<usize> {
        match self {
            PointLayout::Primitive(_) => None,
            PointLayout::Record { members, .. } => members.iter().position(|m| m.name == name),
        }
    }
}

/// Backend-assigned auxiliary declarations, populated once a backend is
/// chosen (e.g. the CUDA backend's on-device grid type and per-operation
/// helper function names).
#[derive(Debug, Clone, Default)]
pub struct GridTypeAux {
    pub device_type_name: Option<String>,
    pub helper_fn_names: Vec<String>,
}

/// Immutable descriptor of one user-declared grid type (§3).
#[derive(Debug, Clone)]
pub struct GridType {
    pub id: GridTypeId,
    pub rank: u8,
    pub layout: PointLayout,
    pub aux: GridTypeAux,
}

impl GridType {
    pub fn is_record(&self) -> bool {
        !self.layout.is_primitive()
    }
}

/// Attaches to the allocation-site AST node of a grid instance.
#[derive(Debug, Clone)]
pub struct Grid {
    pub id: GridId,
    pub grid_type: GridTypeId,
    pub size_exprs: Vec<Expr>,
    pub has_static_size: bool,
    pub static_size: Option<Vec<i64>>,
    /// Opaque user integer passed at allocation (e.g. a NUMA/placement
    /// hint); not interpreted by the core.
    pub attribute_expr: Option<i64>,
    pub stencil_range: StencilRange,
    pub member_stencil_ranges: MemberStencilRangeMap,
}

impl Grid {
    pub fn new(id: GridId, grid_type: GridTypeId, size_exprs: Vec<Expr>, rank: u8) -> Self {
        Grid {
            id,
            grid_type,
            size_exprs,
            has_static_size: false,
            static_size: None,
            attribute_expr: None,
            stencil_range: StencilRange::new(rank),
            member_stencil_ranges: MemberStencilRangeMap::default(),
        }
    }
}

/// An axis-aligned integer rectangle (§3 "Domain").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub rank: u8,
    pub min: Vec<i64>,
    pub max: Vec<i64>,
    /// Present only once a distributed backend has partitioned the domain.
    pub local_min: Option<Vec<i64>>,
    pub local_max: Option<Vec<i64>>,
}

impl Domain {
    pub fn new(min: Vec<i64>, max: Vec<i64>) -> Self {
        assert_eq!(min.len(), max.len());
        Domain {
            rank: min.len() as u8,
            min,
            max,
            local_min: None,
            local_max: None,
        }
    }

    pub fn with_local_slab(mut self, local_min: Vec<i64>, local_max: Vec<i64>) -> Self {
        self.local_min = Some(local_min);
        self.local_max = Some(local_max);
        self
    }

    pub fn local_min_or_global(&self) -> &[i64] {
        self.local_min.as_deref().unwrap_or(&self.min)
    }

    pub fn local_max_or_global(&self) -> &[i64] {
        self.local_max.as_deref().unwrap_or(&self.max)
    }
}

/// One neighbor-offset coordinate (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StencilIndex {
    pub dim: usize,
    pub offset: i64,
}

/// An ordered tuple of `StencilIndex`, one per dimension of a single grid
/// access.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StencilIndexList(pub Vec<StencilIndex>);

impl StencilIndexList {
    pub fn new(indices: Vec<StencilIndex>) -> Self {
        StencilIndexList(indices)
    }

    /// A list is regular iff its dims are a permutation of `1..=rank` (each
    /// iteration variable used exactly once) — §3 invariant.
    pub fn is_regular(&self, rank: usize) -> bool {
        if self.0.len() != rank {
            return false;
        }
        let mut seen = vec![false; rank];
        for idx in &self.0 {
            if idx.dim == 0 || idx.dim > rank {
                return false;
            }
            if seen[idx.dim - 1] {
                return false;
            }
            seen[idx.dim - 1] = true;
        }
        true
    }

    /// Self (center) access: regular and every offset zero.
    pub fn is_self(&self, rank: usize) -> bool {
        self.is_regular(rank) && self.0.iter().all(|i| i.offset == 0)
    }

    /// Canonical per-dimension offsets, ordered `dim=1..=rank`, used as the
    /// dedup/matching key for regular accesses. `None` if irregular.
    pub fn regular_offsets(&self, rank: usize) -> Option<Vec<i64>> {
        if !self.is_regular(rank) {
            return None;
        }
        let mut out = vec![0i64; rank];
        for idx in &self.0 {
            out[idx.dim - 1] = idx.offset;
        }
        Some(out)
    }

    pub fn self_at(rank: usize) -> Self {
        StencilIndexList((1..=rank).map(|d| StencilIndex { dim: d, offset: 0 }).collect())
    }
}

/// Per-grid aggregate of every stencil access observed (§3).
#[derive(Debug, Clone)]
pub struct StencilRange {
    rank: u8,
    /// Canonical regular-offset tuples seen, kept sorted for deterministic
    /// iteration (§8 "Attribute stability": byte-identical modulo key
    /// order, so we normalize the order ourselves).
    entries: Vec<Vec<i64>>,
    /// Set once any irregular (non-affine, or affine-but-unbounded) access
    /// is observed on this grid.
    pub irregular: bool,
    pub periodic: Vec<bool>,
    pub fw: Vec<i64>,
    pub bw: Vec<i64>,
}

impl StencilRange {
    pub fn new(rank: u8) -> Self {
        StencilRange {
            rank,
            entries: Vec::new(),
            irregular: false,
            periodic: vec![false; rank as usize],
            fw: vec![0; rank as usize],
            bw: vec![0; rank as usize],
        }
    }

    pub fn rank(&self) -> usize {
        self.rank as usize
    }

    pub fn entries(&self) -> &[Vec<i64>] {
        &self.entries
    }

    /// Record a regular access and widen the halo per §4.1:
    /// `o_d > 0 => fw[d] = max(fw[d], o_d)`, `o_d < 0 => bw[d] = max(bw[d], -o_d)`.
    pub fn add_regular(&mut self, offsets: &[i64], periodic: bool) {
        if !self.entries.iter().any(|e| e == offsets) {
            self.entries.push(offsets.to_vec());
            self.entries.sort();
        }
        for (d, &o) in offsets.iter().enumerate() {
            if periodic {
                self.periodic[d] = true;
            }
            if o > 0 {
                self.fw[d] = self.fw[d].max(o);
            } else if o < 0 {
                self.bw[d] = self.bw[d].max(-o);
            }
        }
    }

    /// Record an irregular access. Per §4.1, irregular accesses promote
    /// both `fw[d]` and `bw[d]` to the declared maximum offset bound along
    /// every dimension (a configuration constant); with no bound available
    /// the access cannot be proven safe and the caller should reject it.
    pub fn add_irregular(&mut self, max_offset_bound: i64) {
        self.irregular = true;
        for d in 0..self.rank as usize {
            self.fw[d] = self.fw[d].max(max_offset_bound);
            self.bw[d] = self.bw[d].max(max_offset_bound);
        }
    }

    pub fn is_periodic_in(&self, dim: usize) -> bool {
        self.periodic.get(dim).copied().unwrap_or(false)
    }
}

/// Key for `MemberStencilRangeMap`: a member name plus any static array
/// indices into that member (empty unless the member itself is an array).
pub type AccessLoc = (String, Vec<i64>);

/// Per-record-member stencil ranges, declaration-ordered for deterministic
/// emission (§3). Backed by a `Vec` rather than a hash map since grids have
/// at most a handful of members and insertion order is the contract.
#[derive(Debug, Clone, Default)]
pub struct MemberStencilRangeMap {
    entries: Vec<(AccessLoc, StencilRange)>,
}

impl MemberStencilRangeMap {
    pub fn entry_or_insert(&mut self, key: AccessLoc, rank: u8) -> &mut StencilRange {
        if let Some(pos) = self.entries.iter().position(|(k, _)| k == &key) {
            &mut self.entries[pos].1
        } else {
            self.entries.push((key, StencilRange::new(rank)));
            &mut self.entries.last_mut().unwrap().1
        }
    }

    pub fn get(&self, key: &AccessLoc) -> Option<&StencilRange> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, r)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(AccessLoc, StencilRange)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union of all per-member ranges, used by backends that allocate one
    /// halo buffer per grid rather than per member.
    pub fn aggregate(&self, rank: u8) -> StencilRange {
        let mut agg = StencilRange::new(rank);
        for (_, r) in &self.entries {
            for e in r.entries() {
                agg.add_regular(e, false);
            }
            if r.irregular {
                let bound = r.fw.iter().chain(r.bw.iter()).copied().max().unwrap_or(0);
                agg.add_irregular(bound);
            }
            for d in 0..rank as usize {
                if r.is_periodic_in(d) {
                    agg.periodic[d] = true;
                }
            }
        }
        agg
    }
}

/// One `map(kernel, domain, g_1, ..., g_k)` site (§3).
#[derive(Debug, Clone)]
pub struct StencilMap {
    pub id: StencilMapId,
    pub kernel_name: String,
    pub domain: Domain,
    /// Grid arguments in call order.
    pub grid_args: Vec<GridId>,
    /// Stencil range keyed by grid *parameter* position (not argument),
    /// since the same grid argument can be passed to different parameters
    /// of different kernels with different access patterns.
    pub range_by_param: HashMap<usize, StencilRange>,
    pub member_range_by_param: HashMap<usize, MemberStencilRangeMap>,
}

impl StencilMap {
    /// `__PSStencil_<kernel>`, the synthesized per-stencil record type name.
    pub fn stencil_type_name(&self) -> String {
        format!("__PSStencil_{}", self.kernel_name)
    }

    pub fn run_name(&self) -> String {
        format!("__PSStencilRun_{}", self.kernel_name)
    }

    pub fn run_inner_name(&self) -> String {
        format!("{}_inner", self.run_name())
    }

    pub fn run_boundary_name(&self, dim: usize, side: super::analysis::Side) -> String {
        format!(
            "{}_boundary_{}_{}",
            self.run_name(),
            dim + 1,
            side.suffix()
        )
    }
}

/// One `run(count, map_call_1, ..., map_call_m)` site (§3). Monotonic:
/// appending map calls is the only mutation.
#[derive(Debug, Clone, Default)]
pub struct Run {
    pub count: Option<Expr>,
    pub maps: Vec<StencilMapId>,
}

impl Run {
    pub fn push_map(&mut self, id: StencilMapId) {
        self.maps.push(id);
    }
}
