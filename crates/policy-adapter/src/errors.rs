use casbin::error::AdapterError;
use policy_kv::KvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyStoreError {
    #[error("policy store unavailable: {0}")]
    StoreUnavailable(#[source] KvError),
    #[error("concurrent modification of {key}: record changed since index {expected_index}")]
    ConcurrentModification { key: String, expected_index: u64 },
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("encode policy record: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode policy record: {0}")]
    Decode(#[source] serde_json::Error),
}

pub type PolicyStoreResult<T> = Result<T, PolicyStoreError>;

impl PolicyStoreError {
    /// Recover the typed error from a casbin error raised by this adapter.
    pub fn from_casbin(err: &casbin::Error) -> Option<&PolicyStoreError> {
        match err {
            casbin::Error::AdapterError(AdapterError(inner)) => {
                inner.downcast_ref::<PolicyStoreError>()
            }
            _ => None,
        }
    }
}

impl From<PolicyStoreError> for casbin::Error {
    fn from(err: PolicyStoreError) -> Self {
        casbin::Error::AdapterError(AdapterError(Box::new(err)))
    }
}
