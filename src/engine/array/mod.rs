pub mod address;
pub mod attribute;
pub mod coordinates;
pub mod delegate;
pub mod descriptor;
pub mod dimension;
pub mod extract;
pub mod iterator;
pub mod mem_array;

pub use address::Address;
pub use attribute::{AttributeDesc, AttributeId};
pub use coordinates::{Coordinate, Coordinates, CoordinatesMapper};
pub use descriptor::{ArrayDesc, ArrayId, VersionId};
pub use dimension::DimensionDesc;
pub use iterator::{Array, ArrayRef, ChunkRef, ConstArrayIterator};
pub use mem_array::MemArray;

#[cfg(test)]
mod coordinates_test;
#[cfg(test)]
mod descriptor_test;
#[cfg(test)]
mod mem_array_test;
