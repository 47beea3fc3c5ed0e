//! The compiler session: owns every descriptor table, the attribute side
//! table, and all naming counters (§9 "Global mutable state" — nothing here
//! is a process-wide static, so two `Session`s can compile concurrently
//! without interfering).

use std::collections::HashMap;

use crate::analysis::StencilAnalyzer;
use crate::ast::{Kernel, NodeIdGen};
use crate::attributes::AttributeTable;
use crate::backend::{Backend, LoweredMap};
use crate::error::{Result, Span, TranslationError};
use crate::model::{Grid, GridId, GridType, GridTypeId, Run, StencilMap, StencilMapId};

/// Knobs that would, in a full system, come from a loaded configuration
/// file; configuration loading itself is an out-of-scope external
/// collaborator (§1, §6), so this is plain data constructed by the caller.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Declared maximum offset bound used to size the halo for an
    /// irregular-but-provably-bounded access (§4.1).
    pub max_irregular_offset: i64,
    /// CUDA backend thread-block shape, default `(64, 4, 1)` (§4.4).
    pub block_shape: (u32, u32, u32),
    /// Whether the MPI+CUDA backend emits one kernel per boundary slab
    /// (multi-stream) or a single combined boundary kernel (§4.6).
    pub multi_stream_boundary: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_irregular_offset: 1,
            block_shape: (64, 4, 1),
            multi_stream_boundary: true,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    grid_type: u32,
    grid: u32,
    stencil_map: u32,
    name: u32,
}

/// Owns every descriptor created while translating one compilation unit.
pub struct Session {
    pub config: SessionConfig,
    pub node_ids: NodeIdGen,
    pub attrs: AttributeTable,
    counters: Counters,

    grid_types: HashMap<GridTypeId, GridType>,
    grids: HashMap<GridId, Grid>,
    stencil_maps: HashMap<StencilMapId, StencilMap>,
    runs: Vec<Run>,
    kernels: HashMap<String, Kernel>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Session {
            config,
            node_ids: NodeIdGen::default(),
            attrs: AttributeTable::default(),
            counters: Counters::default(),
            grid_types: HashMap::new(),
            grids: HashMap::new(),
            stencil_maps: HashMap::new(),
            runs: Vec::new(),
            kernels: HashMap::new(),
        }
    }

    pub fn fresh_name(&mut self, prefix: &str) -> String {
        let n = self.counters.name;
        self.counters.name += 1;
        format!("{prefix}_{n}")
    }

    // -- Grid types ----------------------------------------------------

    pub fn declare_grid_type(
        &mut self,
        rank: u8,
        layout: crate::model::PointLayout,
    ) -> GridTypeId {
        let id = GridTypeId(self.counters.grid_type);
        self.counters.grid_type += 1;
        self.grid_types.insert(
            id,
            GridType {
                id,
                rank,
                layout,
                aux: Default::default(),
            },
        );
        id
    }

    pub fn grid_type(&self, id: GridTypeId) -> &GridType {
        self.grid_types
            .get(&id)
            .expect("GridTypeId must reference a type declared on this session")
    }

    pub fn grid_type_mut(&mut self, id: GridTypeId) -> &mut GridType {
        self.grid_types
            .get_mut(&id)
            .expect("GridTypeId must reference a type declared on this session")
    }

    // -- Grids -----------------------------------------------------------

    pub fn allocate_grid(
        &mut self,
        grid_type: GridTypeId,
        size_exprs: Vec<crate::ast::Expr>,
    ) -> GridId {
        let id = GridId(self.counters.grid);
        self.counters.grid += 1;
        let rank = self.grid_type(grid_type).rank;
        self.grids.insert(id, Grid::new(id, grid_type, size_exprs, rank));
        id
    }

    pub fn grid(&self, id: GridId) -> &Grid {
        self.grids
            .get(&id)
            .expect("GridId must reference a grid allocated on this session")
    }

    pub fn grid_mut(&mut self, id: GridId) -> &mut Grid {
        self.grids
            .get_mut(&id)
            .expect("GridId must reference a grid allocated on this session")
    }

    // -- Kernels -----------------------------------------------------------

    pub fn register_kernel(&mut self, kernel: Kernel) {
        self.kernels.insert(kernel.name.clone(), kernel);
    }

    pub fn kernel(&self, name: &str) -> Option<&Kernel> {
        self.kernels.get(name)
    }

    pub fn kernel_checked(&self, name: &str, span: crate::error::Span) -> Result<&Kernel> {
        self.kernels
            .get(name)
            .ok_or_else(|| TranslationError::UndefinedKernel {
                span,
                name: name.to_string(),
            })
    }

    // -- Stencil maps --------------------------------------------------

    pub fn new_stencil_map(
        &mut self,
        kernel_name: String,
        domain: crate::model::Domain,
        grid_args: Vec<GridId>,
    ) -> StencilMapId {
        let id = StencilMapId(self.counters.stencil_map);
        self.counters.stencil_map += 1;
        self.stencil_maps.insert(
            id,
            StencilMap {
                id,
                kernel_name,
                domain,
                grid_args,
                range_by_param: HashMap::new(),
                member_range_by_param: HashMap::new(),
            },
        );
        id
    }

    pub fn stencil_map(&self, id: StencilMapId) -> &StencilMap {
        self.stencil_maps
            .get(&id)
            .expect("StencilMapId must reference a map created on this session")
    }

    pub fn stencil_map_mut(&mut self, id: StencilMapId) -> &mut StencilMap {
        self.stencil_maps
            .get_mut(&id)
            .expect("StencilMapId must reference a map created on this session")
    }

    // -- Runs ------------------------------------------------------------

    pub fn new_run(&mut self, count: Option<crate::ast::Expr>) -> usize {
        self.runs.push(Run {
            count,
            maps: Vec::new(),
        });
        self.runs.len() - 1
    }

    pub fn run(&self, index: usize) -> &Run {
        &self.runs[index]
    }

    pub fn run_mut(&mut self, index: usize) -> &mut Run {
        &mut self.runs[index]
    }

    /// Translate every `StencilMap` of `run_index` for `backend`: stencil
    /// analysis (C3), then per-map lowering (C4-C8), in map order. Any fatal
    /// error aborts immediately and discards whatever maps had already
    /// lowered (§7 "partial outputs are discarded on any fatal error") —
    /// there is no half-compiled `Session::compile` result to inspect.
    pub fn compile(&mut self, backend: Backend, run_index: usize) -> Result<Vec<LoweredMap>> {
        let map_ids = self.run(run_index).maps.clone();
        let mut lowered = Vec::with_capacity(map_ids.len());
        for map_id in map_ids {
            let kernel_name = self.stencil_map(map_id).kernel_name.clone();
            let kernel = self.kernel_checked(&kernel_name, Span::default())?.clone();
            StencilAnalyzer::new(self).analyze_map(map_id, &kernel)?;
            lowered.push(backend.lower(self, map_id, run_index)?);
        }
        Ok(lowered)
    }
}
