pub mod fsutils;
pub mod results;
