use libp2p::kad;

use crate::network::events::NetworkEvent;

impl From<kad::Event> for NetworkEvent {
    fn from(event: kad::Event) -> Self {
        NetworkEvent::Kademlia(event)
    }
}
