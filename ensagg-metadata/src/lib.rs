//! Metadata model for realization tables and aggregated artifacts.
//!
//! [`Metadata`] is a typed view of a stored metadata document. Fields the engine does
//! not interpret are kept in `extra` maps so a document survives a parse/serialize cycle
//! unchanged.
//!
//! A run derives one [`MetadataStub`] from a representative realization and every
//! [`Artifact`] clones and patches it through [`build_artifact`].

pub mod artifact;
pub mod document;
pub mod stub;

pub use artifact::{Artifact, Operation, build_artifact, checksum_md5, relative_path};
pub use document::{
    AggregationBlock, CaseBlock, DataBlock, DisplayBlock, FileBlock, FmuBlock, IterationBlock,
    Metadata, RealizationBlock, ServiceBlock, TableSpec,
};
pub use stub::{DEFAULT_TABLE_INDEX, MetadataStub, ParameterSet};
