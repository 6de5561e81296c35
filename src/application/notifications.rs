use crate::domain::ports::{NotificationKind, NotifierRef};
use crate::domain::reservation::Reservation;
use std::sync::Arc;

/// Sends a notification after the state change has been committed.
///
/// Runs on its own task; failures are logged and never reach the caller.
pub(crate) fn dispatch(notifier: &NotifierRef, kind: NotificationKind, reservation: &Reservation) {
    let notifier = Arc::clone(notifier);
    let reservation = reservation.clone();
    tokio::spawn(async move {
        if let Err(e) = notifier
            .notify(&reservation.requester, kind, &reservation)
            .await
        {
            tracing::warn!(
                reference = %reservation.reference,
                kind = ?kind,
                error = %e,
                "notification failed"
            );
        }
    });
}
