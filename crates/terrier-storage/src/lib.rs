//! Physical storage layer: fixed-size blocks with slot-based tuple access,
//! variable-length entries, and the projected row/column views that every
//! higher layer reads and writes through.

pub mod block;
pub mod layout;
pub mod projected;
pub mod varlen;

pub use block::{slot_status, Block, BlockStore};
pub use layout::{BlockLayout, NUM_RESERVED_COLUMNS};
pub use projected::{AttrCell, ProjectedColumns, ProjectedRow};
pub use varlen::{VarlenEntry, VARLEN_INLINE_THRESHOLD};
