use libp2p::identify;

use crate::network::events::NetworkEvent;

impl From<identify::Event> for NetworkEvent {
    fn from(event: identify::Event) -> Self {
        NetworkEvent::Identify(Box::new(event))
    }
}
