pub mod bloom;
pub mod layout;
pub mod manager;

pub use layout::{
    EdgeBlockHeader, EdgeEntry, EdgeLabelBlockHeader, EdgeLabelEntry, VertexBlockHeader,
};
pub use manager::{BlockManager, MIN_ORDER, NULL_POINTER};
