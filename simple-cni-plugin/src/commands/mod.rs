pub mod add;
pub mod check;
pub mod del;
