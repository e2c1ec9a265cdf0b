use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::collaborators::{CollaboratorError, Notification, Notifier};
use crate::model::ResourceRef;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for reservation notifications, one channel per resource.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<ResourceRef, broadcast::Sender<Notification>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to notifications for a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource: ResourceRef) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(resource)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, notification: &Notification) {
        if let Some(sender) = self.channels.get(&notification.resource) {
            let _ = sender.send(notification.clone());
        }
    }

    pub fn remove(&self, resource: &ResourceRef) {
        self.channels.remove(resource);
    }
}

#[async_trait]
impl Notifier for NotifyHub {
    async fn dispatch(&self, notification: Notification) -> Result<(), CollaboratorError> {
        self.send(&notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NotificationKind;
    use crate::model::{ReservationId, ResourceKind};
    use crate::sequence::DayKey;
    use ulid::Ulid;

    fn notification(resource: ResourceRef) -> Notification {
        Notification {
            kind: NotificationKind::Created,
            reservation_id: ReservationId::new(DayKey::for_instant(0), 1),
            resource,
            at: 0,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let r = ResourceRef::new(ResourceKind::Package, Ulid::new());
        let mut rx = hub.subscribe(r);

        let n = notification(r);
        hub.dispatch(n.clone()).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, n);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let r = ResourceRef::new(ResourceKind::Package, Ulid::new());
        hub.send(&notification(r));
    }

    #[tokio::test]
    async fn channels_are_per_resource() {
        let hub = NotifyHub::new();
        let a = ResourceRef::new(ResourceKind::Vehicle, Ulid::new());
        let b = ResourceRef::new(ResourceKind::Vehicle, Ulid::new());
        let mut rx_a = hub.subscribe(a);
        hub.send(&notification(b));
        assert!(rx_a.try_recv().is_err());
        hub.remove(&a);
    }
}
