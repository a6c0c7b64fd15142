pub mod health;
pub mod updates;
pub mod values;
