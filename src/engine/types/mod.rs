pub mod aggregate;
pub mod function_library;
pub mod type_registry;
pub mod value;

pub use aggregate::{Aggregate, AggregateLibrary};
pub use function_library::{FunctionDescription, FunctionLibrary, ResolvedFunction};
pub use type_registry::{Type, TypeRegistry};
pub use value::Value;

#[cfg(test)]
mod aggregate_test;
#[cfg(test)]
mod function_library_test;
#[cfg(test)]
mod type_registry_test;
