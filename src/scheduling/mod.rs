pub mod builder;

pub use builder::{BuiltSchedule, ScheduleBuilder};
