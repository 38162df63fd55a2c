pub mod catalog;
pub mod db;
pub mod prices;
pub mod runs;
