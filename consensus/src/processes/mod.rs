pub mod connect;
pub mod contextual;
pub mod difficulty;
pub mod disconnect;
pub mod stake;
pub mod structural;
