use async_trait::async_trait;

use crate::{
    domain::{Infraction, LedgerRecord, RecordReceipt},
    Result,
};

/// Port for the append-only infraction ledger.
///
/// The signer-sidecar adapter is the first implementation. The ledger does
/// not deduplicate: calling `append_infraction` twice for the same logical
/// infraction produces two records, so callers must call at most once per
/// infraction under normal operation.
#[async_trait]
pub trait LedgerPort: Send + Sync {
    /// Append one infraction record. Resolves only once the ledger has
    /// durably accepted the append, not merely once it was sent. No retry
    /// happens inside the port; the retry decision belongs to the caller,
    /// as does bounding the wait.
    async fn append_infraction(&self, infraction: &Infraction) -> Result<RecordReceipt>;

    /// Read recorded infractions back in insertion order, newest last.
    /// Consumed by the admin dashboard, not by the pipeline.
    async fn list_infractions(&self) -> Result<Vec<LedgerRecord>>;
}
