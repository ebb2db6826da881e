use serde::{Deserialize, Serialize};

use crate::engine::array::coordinates::Coordinates;
use crate::engine::array::descriptor::ArrayDesc;

/// How an array's chunks are assigned to instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PartitioningSchema {
    RoundRobin = 0,
    ByRow = 1,
    ByColumn = 2,
    Replicated = 3,
    LocalInstance = 4,
    Undefined = 5,
}

impl PartitioningSchema {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(PartitioningSchema::RoundRobin),
            1 => Some(PartitioningSchema::ByRow),
            2 => Some(PartitioningSchema::ByColumn),
            3 => Some(PartitioningSchema::Replicated),
            4 => Some(PartitioningSchema::LocalInstance),
            5 => Some(PartitioningSchema::Undefined),
            _ => None,
        }
    }
}

/// Offset/shape vectors attached to a distribution after a coordinate
/// transform (subarray and friends). A distribution carrying a mapper is
/// "violated": its chunk-to-instance assignment no longer matches the
/// plain partitioning schema, which disqualifies some optimizer moves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistributionMapper {
    pub offset: Vec<i64>,
    pub shape: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayDistribution {
    ps: PartitioningSchema,
    mapper: Option<DistributionMapper>,
    /// Owning instance for `LocalInstance` distributions (logical id).
    instance: Option<u64>,
}

impl ArrayDistribution {
    pub fn new(ps: PartitioningSchema) -> Self {
        Self {
            ps,
            mapper: None,
            instance: None,
        }
    }

    pub fn round_robin() -> Self {
        Self::new(PartitioningSchema::RoundRobin)
    }

    pub fn replicated() -> Self {
        Self::new(PartitioningSchema::Replicated)
    }

    pub fn local(instance: u64) -> Self {
        Self {
            ps: PartitioningSchema::LocalInstance,
            mapper: None,
            instance: Some(instance),
        }
    }

    pub fn undefined() -> Self {
        Self::new(PartitioningSchema::Undefined)
    }

    pub fn with_mapper(mut self, mapper: DistributionMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn partitioning_schema(&self) -> PartitioningSchema {
        self.ps
    }

    pub fn mapper(&self) -> Option<&DistributionMapper> {
        self.mapper.as_ref()
    }

    pub fn has_mapper(&self) -> bool {
        self.mapper.is_some()
    }

    pub fn is_violated(&self) -> bool {
        self.mapper.is_some()
    }

    pub fn is_undefined(&self) -> bool {
        self.ps == PartitioningSchema::Undefined
    }

    pub fn instance(&self) -> Option<u64> {
        self.instance
    }

    /// Logical instance owning the chunk at `chunk_pos`; `None` means
    /// every instance holds it (replicated) or ownership is unknowable.
    pub fn instance_for_chunk(
        &self,
        desc: &ArrayDesc,
        chunk_pos: &Coordinates,
        num_instances: u64,
    ) -> Option<u64> {
        if num_instances == 0 {
            return None;
        }
        let effective: Coordinates = match &self.mapper {
            None => chunk_pos.clone(),
            Some(m) => chunk_pos
                .iter()
                .zip(m.offset.iter().chain(std::iter::repeat(&0)))
                .map(|(p, o)| p + o)
                .collect(),
        };
        match self.ps {
            PartitioningSchema::RoundRobin => {
                Some(desc.chunk_linear_index(&effective) % num_instances)
            }
            PartitioningSchema::ByRow => {
                let dim = &desc.dimensions()[0];
                let along = ((effective[0] - dim.start()) / dim.chunk_interval()) as u64;
                Some(along % num_instances)
            }
            PartitioningSchema::ByColumn => {
                if desc.dimensions().len() < 2 {
                    return Some(0);
                }
                let dim = &desc.dimensions()[1];
                let along = ((effective[1] - dim.start()) / dim.chunk_interval()) as u64;
                Some(along % num_instances)
            }
            PartitioningSchema::Replicated => None,
            PartitioningSchema::LocalInstance => self.instance,
            PartitioningSchema::Undefined => None,
        }
    }
}

/// What a physical operator demands of its inputs' distributions.
#[derive(Debug, Clone, PartialEq)]
pub enum DistributionRequirement {
    Any,
    Collocated,
    Specific(ArrayDistribution),
}

impl DistributionRequirement {
    pub fn specific(&self) -> Option<&ArrayDistribution> {
        match self {
            DistributionRequirement::Specific(d) => Some(d),
            _ => None,
        }
    }
}
