pub mod decoder;
pub mod envelope;
pub mod extractor;
pub mod log;
pub mod sink;

pub use decoder::{ContractFilter, Decoder, DecoderContext, DecoderId};
pub use envelope::{Envelope, TypeId, TypedBody};
pub use extractor::{
    BlockContext, ExtractionBatch, Extractor, JsonLinesExtractor, MemoryExtractor,
};
pub use log::RawLog;
pub use sink::{MultiSink, Sink};
