/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `jobs`: job:{job_id} -> Job (JSON)
/// - `idempotency`: idem:{key} -> IdempotencyEntry (JSON)
/// - `metadata`: meta:{key} -> value (string)

/// Encode a job key: job:{job_id}
pub fn encode_job_key(job_id: &str) -> Vec<u8> {
    format!("job:{}", job_id).into_bytes()
}

/// Encode an idempotency key: idem:{key}
pub fn encode_idem_key(key: &str) -> Vec<u8> {
    format!("idem:{}", key).into_bytes()
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}
