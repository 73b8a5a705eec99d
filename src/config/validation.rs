use super::models::Config;
use crate::ledger::snowflake::MAX_NODE_ID;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("ledger.node_id {value} exceeds maximum of {max}")]
    NodeIdOutOfRange { value: u16, max: u16 },

    #[error("retention.max_ttl must be positive")]
    ZeroMaxTtl,

    #[error("retention.default_ttl ({default_ttl}) exceeds retention.max_ttl ({max_ttl})")]
    DefaultTtlExceedsMax { default_ttl: String, max_ttl: String },

    #[error("retention.reclaim_interval_secs must be positive")]
    ZeroReclaimInterval,

    #[error("storage.max_file_size must be positive")]
    ZeroMaxFileSize,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_ledger(config)?;
    validate_storage(config)?;
    validate_retention(config)?;
    Ok(())
}

fn validate_ledger(config: &Config) -> Result<(), ValidationError> {
    if config.ledger.node_id > MAX_NODE_ID {
        return Err(ValidationError::NodeIdOutOfRange {
            value: config.ledger.node_id,
            max: MAX_NODE_ID,
        });
    }
    Ok(())
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.max_file_size.as_u64() == 0 {
        return Err(ValidationError::ZeroMaxFileSize);
    }
    Ok(())
}

fn validate_retention(config: &Config) -> Result<(), ValidationError> {
    let retention = &config.retention;

    if retention.max_ttl.is_zero() {
        return Err(ValidationError::ZeroMaxTtl);
    }

    if retention.default_ttl > retention.max_ttl {
        return Err(ValidationError::DefaultTtlExceedsMax {
            default_ttl: retention.default_ttl.to_string(),
            max_ttl: retention.max_ttl.to_string(),
        });
    }

    if retention.reclaim_interval_secs == 0 {
        return Err(ValidationError::ZeroReclaimInterval);
    }

    Ok(())
}
