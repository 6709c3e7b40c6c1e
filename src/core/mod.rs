pub mod audio;
pub mod clock;
pub mod registry;
pub mod schedule;
pub mod step;
