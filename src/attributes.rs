//! C1 — AST Attributes.
//!
//! Analysis results attached to AST nodes, keyed by `NodeId` in a side table
//! owned by the session rather than stored inside the AST nodes themselves
//! (§9 "Cyclic AST <-> attribute references"). One typed map per attribute
//! kind, mirroring the teacher's pattern of fetching a specific attribute
//! type off a node rather than one untyped bag per node.

use std::collections::HashMap;

use crate::ast::NodeId;
use crate::model::{AccessLoc, GridId, GridTypeId, StencilIndexList};

/// Attached to a recognized `get`/`PSGridGet[Periodic]` expression (§4.1).
#[derive(Debug, Clone)]
pub struct GridGetAttribute {
    pub grid_type: GridTypeId,
    pub grid_param: GridId,
    pub in_kernel: bool,
    pub is_periodic: bool,
    pub indices: StencilIndexList,
    /// Empty for primitive-point grids.
    pub member_name: String,
    /// Non-empty only when the accessed member is itself an array.
    pub static_array_indices: Vec<i64>,
}

impl GridGetAttribute {
    pub fn access_loc(&self) -> AccessLoc {
        (self.member_name.clone(), self.static_array_indices.clone())
    }
}

/// Attached to a recognized `emit`/`PSGridEmit[Utype]` expression.
#[derive(Debug, Clone)]
pub struct GridEmitAttribute {
    pub grid_type: GridTypeId,
    pub grid_param: GridId,
    pub in_kernel: bool,
    pub is_periodic: bool,
    pub indices: StencilIndexList,
    pub member_name: String,
    pub static_array_indices: Vec<i64>,
}

impl GridEmitAttribute {
    pub fn access_loc(&self) -> AccessLoc {
        (self.member_name.clone(), self.static_array_indices.clone())
    }
}

/// The side table. Owned by `Session`; never consulted by equality or
/// ordering of AST nodes themselves.
#[derive(Debug, Default)]
pub struct AttributeTable {
    grid_gets: HashMap<NodeId, GridGetAttribute>,
    grid_emits: HashMap<NodeId, GridEmitAttribute>,
}

macro_rules! attr_accessors {
    ($field:ident, $ty:ty, $get:ident, $set:ident) => {
        pub fn $get(&self, id: NodeId) -> Option<&$ty> {
            self.$field.get(&id)
        }

        pub fn $set(&mut self, id: NodeId, attr: $ty) {
            self.$field.insert(id, attr);
        }
    };
}

impl AttributeTable {
    attr_accessors!(grid_gets, GridGetAttribute, grid_get, set_grid_get);
    attr_accessors!(grid_emits, GridEmitAttribute, grid_emit, set_grid_emit);
}
