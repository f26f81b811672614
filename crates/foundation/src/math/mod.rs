pub mod ray;
pub mod vec;

pub use ray::*;
pub use vec::*;
