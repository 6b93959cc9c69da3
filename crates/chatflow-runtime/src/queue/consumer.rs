//! Queue consumers.
//!
//! Each consumer reserves one delivery at a time, renders it through the
//! platform registry and settles it:
//!
//! | Result | Settlement |
//! |--------|------------|
//! | sent | ack |
//! | unknown platform, undecodable body, no recipient | reject |
//! | platform failure, retries left | nack with backoff |
//! | platform failure, retries exhausted | dead letter |

use std::time::Duration;

use chatflow_core::SharedPlatforms;
use chatflow_framework::{DispatchError, deliver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::{DeliveryQueue, Reservation};
use crate::config::RetryConfig;

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Delivered,
    Retrying,
    Rejected,
    DeadLettered,
}

/// Delivers one reserved envelope and settles the reservation.
pub async fn process(
    platforms: &SharedPlatforms,
    retry: &RetryConfig,
    reservation: Reservation,
) -> Settlement {
    let envelope = match reservation.envelope() {
        Ok(envelope) => envelope,
        Err(e) => {
            reservation.reject(&e.to_string());
            return Settlement::Rejected;
        }
    };
    if envelope.platform().is_empty() || envelope.rcpt_to.is_empty() {
        reservation.reject("envelope has no platform or recipient");
        return Settlement::Rejected;
    }

    match deliver(platforms, &envelope).await {
        Ok(()) => {
            reservation.ack();
            Settlement::Delivered
        }
        Err(e @ DispatchError::Registry(_)) => {
            reservation.reject(&e.to_string());
            Settlement::Rejected
        }
        Err(e) => {
            let attempts = reservation.delivery().attempts + 1;
            if retry.should_retry(attempts) {
                let delay = retry.delay(attempts);
                warn!(
                    platform = %envelope.platform(),
                    attempts,
                    ?delay,
                    error = %e,
                    "Delivery failed, retrying"
                );
                reservation.nack(delay);
                Settlement::Retrying
            } else {
                reservation.dead_letter(&e.to_string());
                Settlement::DeadLettered
            }
        }
    }
}

/// Starts `count` consumers that run until `token` is cancelled.
///
/// A consumer finishes the delivery it holds before it stops.
pub fn spawn_consumers(
    queue: DeliveryQueue,
    platforms: SharedPlatforms,
    retry: RetryConfig,
    count: usize,
    poll_interval: Duration,
    token: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker| {
            let queue = queue.clone();
            let platforms = platforms.clone();
            let retry = retry.clone();
            let token = token.clone();
            tokio::spawn(
                async move {
                    debug!("Consumer started");
                    loop {
                        let reservation = tokio::select! {
                            _ = token.cancelled() => break,
                            r = queue.reserve(poll_interval) => r,
                        };
                        match reservation {
                            Some(reservation) => {
                                process(&platforms, &retry, reservation).await;
                            }
                            None if queue.is_closed() => break,
                            None => {}
                        }
                    }
                    info!("Consumer stopped");
                }
                .instrument(info_span!("consumer", worker)),
            )
        })
        .collect()
}
