pub mod session;
pub mod state;

pub use session::RoomSession;
pub use state::{Participant, PeerConnectionEntry, Registry, RemoteStream};
