pub mod credits;
