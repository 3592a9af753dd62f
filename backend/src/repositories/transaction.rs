//! Transaction management utilities for repositories.

use crate::error::ChangeError;
use sqlx::postgres::PgTransaction;
use sqlx::PgPool;

/// Begin a new database transaction.
///
/// Returns a transaction handle that can be used for multiple database operations.
/// On success, the transaction can be committed via [`commit_transaction`].
/// On failure, the transaction can be rolled back via [`rollback_transaction`].
pub async fn begin_transaction(db: &PgPool) -> Result<PgTransaction<'static>, ChangeError> {
    db.begin()
        .await
        .map_err(|e| ChangeError::persistence("begin transaction", e))
}

/// Commit a transaction.
///
/// Commits all changes made within the transaction to the database.
pub async fn commit_transaction(tx: PgTransaction<'_>) -> Result<(), ChangeError> {
    tx.commit()
        .await
        .map_err(|e| ChangeError::persistence("commit transaction", e))
}

/// Rollback a transaction.
///
/// Undoes all changes made within the transaction since it began.
pub async fn rollback_transaction(tx: PgTransaction<'_>) -> Result<(), ChangeError> {
    tx.rollback()
        .await
        .map_err(|e| ChangeError::persistence("rollback transaction", e))
}
