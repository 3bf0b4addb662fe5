pub mod chunker;
pub mod embedding_service;
pub mod feedback_store;
pub mod ingest_service;
pub mod intent_router;
pub mod prompt_formatter;
pub mod reranker;
pub mod retriever;
pub mod vector_store;

pub use chunker::*;
pub use embedding_service::*;
pub use feedback_store::*;
pub use ingest_service::*;
pub use intent_router::*;
pub use prompt_formatter::*;
pub use reranker::*;
pub use retriever::*;
pub use vector_store::*;
