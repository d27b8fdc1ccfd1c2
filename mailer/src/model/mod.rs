pub mod area_state;
pub mod monitored_area;
