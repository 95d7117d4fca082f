pub mod bar;
pub mod listing;
pub mod prediction;
