use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted after a committed state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated {
        cart_id: Uuid,
        user_id: Uuid,
    },
    CartItemAdded {
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartItemUpdated {
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        cart_id: Uuid,
        item_id: Uuid,
    },
    CartCleared {
        cart_id: Uuid,
        items_removed: u64,
    },

    // Payment events
    CheckoutSessionCreated {
        payment_id: Uuid,
        session_id: String,
    },
    PaymentCompleted {
        payment_id: Uuid,
        session_id: String,
    },
    PaymentsExpired {
        count: u64,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::PaymentCompleted {
                payment_id,
                session_id,
            } => info!(%payment_id, %session_id, "payment completed"),
            Event::CartCleared {
                cart_id,
                items_removed,
            } => info!(%cart_id, items_removed, "cart cleared"),
            Event::PaymentsExpired { count } => info!(count, "pending payments expired"),
            other => info!(event = ?other, "domain event"),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let cart_id = Uuid::new_v4();

        sender
            .send(Event::CartCleared {
                cart_id,
                items_removed: 2,
            })
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Event::CartCleared {
                cart_id,
                items_removed: 2
            })
        );
    }

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        assert!(sender.send(Event::PaymentsExpired { count: 1 }).await.is_err());
        sender.send_or_log(Event::PaymentsExpired { count: 1 }).await;
    }
}
