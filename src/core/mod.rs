pub mod geometry;
pub mod record;
