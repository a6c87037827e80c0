mod router;
mod state;

pub use router::{Delivery, Outbound, RoomRouter};
pub use state::Room;
