pub mod allocator;
pub mod reservations;
pub mod score;

pub use allocator::{Allocation, PriorityAllocator};
pub use reservations::{EdgeReservations, ReservationGuard};
pub use score::ScoreWeights;
