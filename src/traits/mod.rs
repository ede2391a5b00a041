pub mod bucket;
pub mod catalog;
pub mod rules;
pub mod select;
