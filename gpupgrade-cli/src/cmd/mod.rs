pub mod check;
pub mod monitor;
pub mod prepare;
pub mod status;
pub mod upgrade;
pub mod version;
