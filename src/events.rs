use tokio::sync::broadcast;

use crate::content::BlockAnnouncement;
use crate::peer::PeerHandle;

/// Emitted once for every announcement handed to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareEvent {
    pub announcement: BlockAnnouncement,
    pub peer: PeerHandle,
    /// whether the announcement updated tracked state
    pub accepted: bool,
}

/// Fires the `ShareEvent` for one announcement when dropped.
///
/// Sending goes through even if intake returns early or panics.
pub(crate) struct Observation<'a> {
    events: &'a broadcast::Sender<ShareEvent>,
    announcement: &'a BlockAnnouncement,
    peer: PeerHandle,
    accepted: bool,
}

impl<'a> Observation<'a> {
    pub(crate) fn new(
        events: &'a broadcast::Sender<ShareEvent>,
        announcement: &'a BlockAnnouncement,
        peer: PeerHandle,
    ) -> Self {
        Self {
            events,
            announcement,
            peer,
            accepted: false,
        }
    }

    pub(crate) fn set_accepted(&mut self, accepted: bool) {
        self.accepted = accepted;
    }
}

impl Drop for Observation<'_> {
    fn drop(&mut self) {
        // an error only means nobody is subscribed
        let _ = self.events.send(ShareEvent {
            announcement: self.announcement.clone(),
            peer: self.peer,
            accepted: self.accepted,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_drop() {
        let (events, mut rx) = broadcast::channel(4);
        let announcement = BlockAnnouncement::retraction("songA", 64, 0);
        {
            let mut observation = Observation::new(&events, &announcement, PeerHandle(3));
            observation.set_accepted(true);
        }
        let event = rx.try_recv().unwrap();
        assert_eq!(event.peer, PeerHandle(3));
        assert!(event.accepted);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fires_while_unwinding() {
        let (events, mut rx) = broadcast::channel(4);
        let announcement = BlockAnnouncement::retraction("songA", 64, 0);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _observation = Observation::new(&events, &announcement, PeerHandle(3));
            panic!("intake failed");
        }));
        assert!(result.is_err());
        assert!(!rx.try_recv().unwrap().accepted);
    }

    #[test]
    fn no_subscribers_is_fine() {
        let (events, rx) = broadcast::channel::<ShareEvent>(4);
        drop(rx);
        let announcement = BlockAnnouncement::retraction("songA", 64, 0);
        drop(Observation::new(&events, &announcement, PeerHandle(1)));
    }
}
