pub mod parser;
pub mod pipeline;

pub use parser::{Part, PartParser};
pub use pipeline::{IngestReceipt, IngestRequest, IngestionPipeline};
