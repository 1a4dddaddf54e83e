pub mod product;

pub use product::{DetailUpdate, Product};
