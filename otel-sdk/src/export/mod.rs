//! Building blocks shared by the export pipelines of every signal.
//!
//! [`BatchProcessor`] buffers records in a bounded queue and hands them to a
//! [`BatchExporter`] in batches from a dedicated worker thread. The log and
//! metric batch processors are thin adapters over it.

mod batch;

pub use batch::{
    BatchConfig, BatchConfigBuilder, BatchConfigError, BatchExporter, BatchProcessor,
};
