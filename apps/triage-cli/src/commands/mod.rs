pub mod inspect;
pub mod seed;
