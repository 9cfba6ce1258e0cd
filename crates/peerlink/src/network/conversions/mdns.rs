use libp2p::mdns;

use crate::network::events::NetworkEvent;

impl From<mdns::Event> for NetworkEvent {
    fn from(event: mdns::Event) -> Self {
        NetworkEvent::Mdns(event)
    }
}
