use crate::cache::ResourceId;

/// Error type for metadata cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Only one export session may have a metadata cache bound at a time.
    #[error("an export session already has a metadata cache bound in this process")]
    SessionAlreadyActive,

    /// The sweep visited an entry it could no longer remove. The sweep is the
    /// sole remover, so this means the store was mutated behind its back.
    #[error("metadata cache corrupted: entry for resource {0} vanished during sweep")]
    Corrupted(ResourceId),
}

/// Result type for metadata cache operations
pub type CacheResult<T> = Result<T, CacheError>;
