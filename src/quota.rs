//! Token quota enforcement
//!
//! The conversation store persists per-identity totals; this module only
//! decides whether a total is within the account's limit.

use crate::error::{NotestreamError, Result};

/// Token quota limits for one account plan
///
/// # Examples
///
/// ```
/// use notestream::quota::QuotaLimits;
///
/// let limits = QuotaLimits {
///     max_total_tokens: Some(50_000),
/// };
/// assert!(!limits.is_unlimited());
/// assert_eq!(limits.remaining(20_000), Some(30_000));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaLimits {
    /// Maximum total tokens per identity (None = unlimited)
    pub max_total_tokens: Option<u64>,
}

impl QuotaLimits {
    /// Limits with no cap
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// True when no limit is configured
    pub fn is_unlimited(&self) -> bool {
        self.max_total_tokens.is_none()
    }

    /// Tokens left before the limit, or None if unlimited
    pub fn remaining(&self, used: u64) -> Option<u64> {
        self.max_total_tokens.map(|max| max.saturating_sub(used))
    }

    /// Checks that an identity with `used` tokens may start another turn
    ///
    /// # Errors
    ///
    /// Returns `NotestreamError::QuotaExceeded` once the whole budget is
    /// used.
    pub fn check_available(&self, used: u64) -> Result<()> {
        match self.max_total_tokens {
            Some(max) if used >= max => Err(anyhow::anyhow!(NotestreamError::QuotaExceeded(
                format!("Token limit reached: {}/{}", used, max)
            ))),
            _ => Ok(()),
        }
    }

    /// Checks a total that already includes the latest turn
    ///
    /// # Returns
    ///
    /// The total when it is within the limit
    ///
    /// # Errors
    ///
    /// Returns `NotestreamError::QuotaExceeded` if the total is over the
    /// limit.
    ///
    /// # Examples
    ///
    /// ```
    /// use notestream::quota::QuotaLimits;
    ///
    /// let limits = QuotaLimits { max_total_tokens: Some(10_000) };
    ///
    /// assert_eq!(limits.check_total(10_000)?, 10_000);
    /// assert!(limits.check_total(11_000).is_err());
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn check_total(&self, total: u64) -> Result<u64> {
        match self.max_total_tokens {
            Some(max) if total > max => Err(anyhow::anyhow!(NotestreamError::QuotaExceeded(
                format!("Token limit exceeded: {}/{}", total, max)
            ))),
            _ => Ok(total),
        }
    }
}
