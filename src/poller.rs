//! Inbox poller — the responder's outer loop.
//!
//! Every tick fetches the unanswered mail in the inbox, skips whatever
//! the ledger has already answered, and dispatches the rest with a
//! growing stagger so replies trickle out instead of leaving as a
//! burst. The first tick runs immediately on startup.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::config::{POLL_INTERVAL, STAGGER_INCREMENT};
use crate::dispatch::Dispatcher;
use crate::mail::MailSource;
use crate::store::Database;

/// Spawn the poll loop. Returns the loop's handle and a shutdown flag;
/// the flag is only checked between ticks.
pub fn spawn_inbox_poller(
    source: Arc<dyn MailSource>,
    store: Arc<dyn Database>,
    dispatcher: Arc<Dispatcher>,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            interval_secs = POLL_INTERVAL.as_secs(),
            "Inbox poller started"
        );

        loop {
            if flag.load(Ordering::Relaxed) {
                info!("Inbox poller shutting down");
                return;
            }

            poll_once(source.as_ref(), store.as_ref(), &dispatcher).await;

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    });

    (handle, shutdown)
}

/// One poll tick. Returns the handles of the deferred send tasks it
/// scheduled; the loop drops them and the sends run detached.
pub async fn poll_once(
    source: &dyn MailSource,
    store: &dyn Database,
    dispatcher: &Dispatcher,
) -> Vec<JoinHandle<()>> {
    info!("Checking for new messages");

    let emails = match source.fetch_unanswered().await {
        Ok(emails) => emails,
        Err(e) => {
            error!(error = %e, "Failed to fetch inbox");
            return Vec::new();
        }
    };

    let mut handles = Vec::new();
    let mut stagger = Duration::ZERO;

    for email in emails {
        trace!(
            email_id = %email.message_id,
            subject = %email.subject,
            from = %email.sender(),
            "Handling found email"
        );

        // replied_message_id is the processed marker; a bare mail row
        // means a reply was generated but never confirmed sent.
        match store.find_mail_by_message_id(&email.message_id).await {
            Ok(Some(mail)) if mail.is_processed() => {
                debug!(
                    email_id = %email.message_id,
                    subject = %email.subject,
                    "Skipping email as it has already been processed"
                );
                continue;
            }
            Ok(_) => {
                debug!(
                    email_id = %email.message_id,
                    subject = %email.subject,
                    "Processing email"
                );
            }
            Err(e) => {
                error!(
                    error = %e,
                    email_id = %email.message_id,
                    "Failed to check mail state"
                );
                continue;
            }
        }

        let email_id = email.message_id.clone();
        match dispatcher.handle_email(email, stagger).await {
            Ok(handle) => {
                handles.push(handle);
                stagger += STAGGER_INCREMENT;
            }
            Err(e) => {
                error!(error = %e, email_id = %email_id, "Failed to dispatch email");
            }
        }
    }

    handles
}
